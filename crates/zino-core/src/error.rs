// ── Core error types ──

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("SNMP error: {0}")]
    Snmp(#[from] zino_snmp::SnmpError),

    #[error("configuration error: {0}")]
    Config(#[from] zino_config::ConfigError),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("state encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
