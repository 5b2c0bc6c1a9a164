// ── Line-protocol framing ──
//
// CR/LF lines, UTF-8 with Latin-1 fallback on the way in. Multi-line
// responses are `3xx header`, data lines with dot-stuffing, and a lone
// `.` terminator; the same stuffing is undone when reading multi-line
// input (ADDHIST, PM ADDLOG).

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Read one line, without its terminator. `None` on EOF.
pub async fn read_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(decode(buf)))
}

/// UTF-8, falling back to Latin-1 (every byte maps to a scalar value).
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}

pub async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// One-line status response: `CCC text`.
pub async fn respond<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: u16,
    text: &str,
) -> std::io::Result<()> {
    write_line(writer, &format!("{code} {text}")).await
}

/// Multi-line response: header, dot-stuffed data lines, `.` terminator.
pub async fn respond_multiline<W: AsyncWrite + Unpin, S: AsRef<str>>(
    writer: &mut W,
    header: &str,
    lines: impl IntoIterator<Item = S>,
) -> std::io::Result<()> {
    write_line(writer, &format!("300 {header}")).await?;
    for line in lines {
        let line = line.as_ref();
        if line.starts_with('.') {
            write_line(writer, &format!(".{line}")).await?;
        } else {
            write_line(writer, line).await?;
        }
    }
    write_line(writer, ".").await
}

/// Read dot-terminated input lines, undoing dot-stuffing.
/// `None` when the connection closes before the terminator.
pub async fn read_multiline<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> std::io::Result<Option<Vec<String>>> {
    let mut lines = Vec::new();
    loop {
        let Some(line) = read_line(reader).await? else {
            return Ok(None);
        };
        if line == "." {
            return Ok(Some(lines));
        }
        if let Some(stuffed) = line.strip_prefix('.') {
            lines.push(stuffed.to_owned());
        } else {
            lines.push(line);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn read_line_strips_crlf_and_handles_eof() {
        let input: &[u8] = b"CASEIDS\r\nQUIT\n";
        let mut reader = BufReader::new(input);
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "CASEIDS");
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "QUIT");
        assert!(read_line(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latin1_fallback_never_fails() {
        let input: &[u8] = b"USER r\xf8d\r\n";
        let mut reader = BufReader::new(input);
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "USER r\u{f8}d");
    }

    #[tokio::test]
    async fn multiline_response_is_dot_stuffed_and_terminated() {
        let mut out = Vec::new();
        respond_multiline(&mut out, "history follows", [".leading dot", "plain"])
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "300 history follows\r\n..leading dot\r\nplain\r\n.\r\n"
        );
    }

    #[tokio::test]
    async fn multiline_input_unstuffs_dots() {
        let input: &[u8] = b"first\r\n..dotted\r\n.\r\n";
        let mut reader = BufReader::new(input);
        let lines = read_multiline(&mut reader).await.unwrap().unwrap();
        assert_eq!(lines, vec!["first".to_owned(), ".dotted".to_owned()]);
    }

    #[tokio::test]
    async fn unterminated_multiline_input_is_none() {
        let input: &[u8] = b"first\r\n";
        let mut reader = BufReader::new(input);
        assert!(read_multiline(&mut reader).await.unwrap().is_none());
    }
}
