// ── TCP servers ──
//
// Port 8001 speaks the operator command protocol; port 8002 is the
// notify push channel. Each accepted connection runs in its own task
// under a child cancellation token.

pub mod command;
pub mod notify;
pub mod proto;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use zino_core::Engine;

pub use command::{ServerContext, SERVER_VERSION};
pub use notify::NotifyRegistry;

pub const COMMAND_PORT: u16 = 8001;
pub const NOTIFY_PORT: u16 = 8002;

pub async fn serve_command(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.clone().cancelled_owned() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let ctx = Arc::clone(&ctx);
                    let child = cancel.child_token();
                    tokio::spawn(Box::pin(command::handle_connection(stream, ctx, child)));
                }
                Err(err) => warn!(%err, "command accept failed"),
            },
        }
    }
}

pub async fn serve_notify(
    listener: TcpListener,
    engine: Engine,
    registry: Arc<NotifyRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.clone().cancelled_owned() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let engine = engine.clone();
                    let registry = Arc::clone(&registry);
                    let child = cancel.child_token();
                    tokio::spawn(notify::handle_connection(stream, engine, registry, child));
                }
                Err(err) => warn!(%err, "notify accept failed"),
            },
        }
    }
}
