// ── Secrets file ──
//
// One `user password` per line, `#` comments and blank lines ignored.
// Passwords are cleartext; the file should not be readable by others,
// and a permissive mode produces a startup warning.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::ConfigError;

/// The command-protocol user database.
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    users: HashMap<String, String>,
}

impl Secrets {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path);
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Secrets {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn parse(content: &str, path: &str) -> Result<Self, ConfigError> {
        let mut users = HashMap::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, password)) = line.split_once(char::is_whitespace) else {
                return Err(ConfigError::Secrets {
                    path: path.into(),
                    reason: format!("line {}: expected 'user password'", index + 1),
                });
            };
            users.insert(user.trim().to_owned(), password.trim().to_owned());
        }
        Ok(Self { users })
    }

    /// The cleartext password for `user`, if known.
    pub fn password(&self, user: &str) -> Option<&str> {
        self.users.get(user).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o044 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "secrets file is readable by group/other"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_users_and_skips_comments() {
        let secrets = Secrets::parse(
            "# operators\nuser1 password123\n\nuser2\tother-secret\n",
            "secrets",
        )
        .unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets.password("user1"), Some("password123"));
        assert_eq!(secrets.password("user2"), Some("other-secret"));
        assert_eq!(secrets.password("nobody"), None);
    }

    #[test]
    fn rejects_lines_without_password() {
        assert!(Secrets::parse("user-only\n", "secrets").is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "op hunter2").unwrap();
        let secrets = Secrets::load(file.path()).unwrap();
        assert_eq!(secrets.password("op"), Some("hunter2"));
    }
}
