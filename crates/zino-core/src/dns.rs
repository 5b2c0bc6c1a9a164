// ── Reverse DNS ──
//
// PTR lookups for BFD neighbors. The system resolver call is blocking,
// so it runs on the blocking pool with a hard timeout.

use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The PTR name for `addr`, or `None` on any failure.
pub async fn reverse_lookup(addr: IpAddr) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr));
    match tokio::time::timeout(LOOKUP_TIMEOUT, lookup).await {
        Ok(Ok(Ok(name))) => Some(name),
        Ok(Ok(Err(err))) => {
            debug!(%addr, %err, "reverse lookup failed");
            None
        }
        Ok(Err(join_err)) => {
            debug!(%addr, %join_err, "reverse lookup task failed");
            None
        }
        Err(_) => {
            debug!(%addr, "reverse lookup timed out");
            None
        }
    }
}
