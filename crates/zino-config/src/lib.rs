//! Configuration loading for Zino.
//!
//! Three inputs: the TOML main config (file + `ZINO_`-prefixed env
//! overrides), the pollfile describing the devices to monitor, and the
//! secrets file for command-protocol users.

pub mod pollfile;
pub mod secrets;

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pollfile::{DeviceRegistry, PollDevice, PollfileWatcher};
pub use secrets::Secrets;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{path}:{line}: {reason}")]
    Pollfile {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("secrets file {path}: {reason}")]
    Secrets { path: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    #[serde(default)]
    pub archiving: Archiving,

    #[serde(default)]
    pub authentication: Authentication,

    #[serde(default)]
    pub persistence: Persistence,

    #[serde(default)]
    pub polling: Polling,

    #[serde(default)]
    pub snmp: Snmp,

    #[serde(default)]
    pub logging: Logging,

    #[serde(default)]
    pub process: Process,

    #[serde(default)]
    pub scheduler: SchedulerOpts,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Archiving {
    /// Directory closed events are archived into, date-sharded.
    #[serde(default = "default_old_events_dir")]
    pub old_events_dir: PathBuf,
}

impl Default for Archiving {
    fn default() -> Self {
        Self {
            old_events_dir: default_old_events_dir(),
        }
    }
}

fn default_old_events_dir() -> PathBuf {
    "old-events".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Authentication {
    /// The secrets file: one `user password` per line.
    #[serde(default = "default_secrets_file")]
    pub file: PathBuf,
}

impl Default for Authentication {
    fn default() -> Self {
        Self {
            file: default_secrets_file(),
        }
    }
}

fn default_secrets_file() -> PathBuf {
    "secrets".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Persistence {
    #[serde(default = "default_state_file")]
    pub file: PathBuf,

    /// Minutes between periodic state dumps.
    #[serde(default = "default_persistence_period")]
    pub period: u64,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            file: default_state_file(),
            period: default_persistence_period(),
        }
    }
}

fn default_state_file() -> PathBuf {
    "zino-state.json".into()
}
fn default_persistence_period() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Polling {
    #[serde(default = "default_pollfile")]
    pub file: PathBuf,

    /// Minutes between pollfile modification checks.
    #[serde(default = "default_polling_period")]
    pub period: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            file: default_pollfile(),
            period: default_polling_period(),
        }
    }
}

fn default_pollfile() -> PathBuf {
    "polldevs.cf".into()
}
fn default_polling_period() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snmp {
    /// Transport backend name; "mock" is built in, others are external.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub trap: TrapOpts,
}

impl Default for Snmp {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            trap: TrapOpts::default(),
        }
    }
}

fn default_backend() -> String {
    "mock".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrapOpts {
    #[serde(default = "default_trap_port")]
    pub port: u16,

    /// When non-empty, traps whose community is not listed are dropped.
    #[serde(default)]
    pub require_community: Vec<String>,
}

impl Default for TrapOpts {
    fn default() -> Self {
        Self {
            port: default_trap_port(),
            require_community: Vec::new(),
        }
    }
}

fn default_trap_port() -> u16 {
    162
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    /// Filter directive, e.g. "info" or "zino_core=debug".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Process {
    /// User to run as after binding privileged sockets.
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerOpts {
    /// Seconds a misfired job run may be late and still execute.
    #[serde(default = "default_misfire_grace_time")]
    pub misfire_grace_time: u64,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            misfire_grace_time: default_misfire_grace_time(),
        }
    }
}

fn default_misfire_grace_time() -> u64 {
    60
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the main configuration from `path` plus `ZINO_*` env overrides.
pub fn load_configuration(path: &Path) -> Result<Configuration, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Configuration::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ZINO_").split("_"));

    let config: Configuration = figment.extract()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_file_missing() {
        let config = load_configuration(Path::new("/nonexistent/zino.toml")).unwrap();
        assert_eq!(config.persistence.period, 5);
        assert_eq!(config.snmp.trap.port, 162);
        assert_eq!(config.archiving.old_events_dir, PathBuf::from("old-events"));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[persistence]
file = "/var/lib/zino/state.json"
period = 10

[snmp]
backend = "mock"

[snmp.trap]
port = 10162
require_community = ["secret"]
"#
        )
        .unwrap();

        let config = load_configuration(file.path()).unwrap();
        assert_eq!(config.persistence.period, 10);
        assert_eq!(
            config.persistence.file,
            PathBuf::from("/var/lib/zino/state.json")
        );
        assert_eq!(config.snmp.trap.port, 10162);
        assert_eq!(config.snmp.trap.require_community, vec!["secret".to_owned()]);
        // untouched section keeps its default
        assert_eq!(config.polling.period, 1);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[persistence").unwrap();
        assert!(load_configuration(file.path()).is_err());
    }
}
