// ── Notify server (port 8002) ──
//
// On connect the client gets one line containing a fresh nonce and is
// expected to bind it to a command session with NTIE. Once tied, every
// event change becomes one push line. A slow client only ever blocks
// its own task; when its broadcast buffer overflows, the skipped
// messages are summarized by a `scavenged` line. Nothing is replayed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use zino_core::store::{ChangeKind, EventChange};
use zino_core::Engine;

use super::proto::write_line;
use crate::auth::random_hex;

/// Nonce → not-yet-tied session. Tying consumes the entry.
#[derive(Default)]
pub struct NotifyRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, nonce: String, tie_tx: oneshot::Sender<()>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(nonce, tie_tx);
    }

    fn unregister(&self, nonce: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(nonce);
    }

    /// Bind a command session to the notify session holding `nonce`.
    /// Fails when the nonce is unknown or was already tied.
    pub fn tie(&self, nonce: &str) -> bool {
        let slot = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(nonce);
        match slot {
            Some(tie_tx) => tie_tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Render one change as a push line.
fn format_change(change: &EventChange) -> String {
    match &change.kind {
        ChangeKind::State(state) => format!("{} state {state}", change.id),
        ChangeKind::Attr(name) => format!("{} attr {name}", change.id),
        ChangeKind::Log => format!("{} log log", change.id),
        ChangeKind::History => format!("{} history history", change.id),
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    engine: Engine,
    registry: Arc<NotifyRegistry>,
    cancel: CancellationToken,
) {
    let peer = stream.peer_addr().ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let nonce = random_hex(20);
    if write_line(&mut write_half, &nonce).await.is_err() {
        return;
    }

    let (tie_tx, tie_rx) = oneshot::channel();
    registry.register(nonce.clone(), tie_tx);
    debug!(?peer, "notify session awaiting NTIE");

    // The client sends nothing; a read completing means it hung up.
    let mut drain = [0u8; 64];
    let tied = tokio::select! {
        () = cancel.clone().cancelled_owned() => false,
        result = tie_rx => result.is_ok(),
        _ = reader.read(&mut drain) => false,
    };
    if !tied {
        registry.unregister(&nonce);
        debug!(?peer, "notify session ended before tie");
        return;
    }

    info!(?peer, "notify session tied");
    let mut changes = engine.events().subscribe();
    loop {
        let line = tokio::select! {
            () = cancel.clone().cancelled_owned() => break,
            _ = reader.read(&mut drain) => break,
            change = changes.recv() => match change {
                Ok(change) => format_change(&change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    format!("0 scavenged {skipped}")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if write_line(&mut write_half, &line).await.is_err() {
            break;
        }
    }
    debug!(?peer, "notify session closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tie_consumes_the_nonce() {
        let registry = NotifyRegistry::new();
        let (tie_tx, mut tie_rx) = oneshot::channel();
        registry.register("abc123".into(), tie_tx);

        assert!(registry.tie("abc123"));
        assert!(tie_rx.try_recv().is_ok());
        // Second tie on the same nonce fails.
        assert!(!registry.tie("abc123"));
        assert!(!registry.tie("never-issued"));
    }

    #[test]
    fn change_lines_follow_the_wire_format() {
        use zino_core::model::EventState;

        assert_eq!(
            format_change(&EventChange {
                id: 7,
                kind: ChangeKind::State(EventState::Open)
            }),
            "7 state open"
        );
        assert_eq!(
            format_change(&EventChange {
                id: 7,
                kind: ChangeKind::Attr("portstate".into())
            }),
            "7 attr portstate"
        );
        assert_eq!(
            format_change(&EventChange {
                id: 7,
                kind: ChangeKind::Log
            }),
            "7 log log"
        );
    }
}
