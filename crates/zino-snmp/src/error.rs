// ── SNMP error types ──
//
// Transport-agnostic failure modes. Backends map their wire-level
// errors into these before they reach the polling tasks.

use thiserror::Error;

use crate::oid::Oid;

#[derive(Debug, Clone, Error)]
pub enum SnmpError {
    /// The agent did not answer within the session timeout, after retries.
    #[error("SNMP request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The agent answered with a non-zero error-status field.
    #[error("agent returned error status {status} at varbind {index}")]
    ErrorStatus { status: u32, index: u32 },

    /// The requested object does not exist on the agent.
    #[error("no such object: {0}")]
    NoSuchObject(Oid),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("unknown SNMP backend '{0}'")]
    UnknownBackend(String),
}
