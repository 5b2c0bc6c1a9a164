// ── Pollfile parsing and the device registry ──
//
// The pollfile (`polldevs.cf`) is line-oriented: blocks of `key: value`
// lines separated by blank lines. `default <key>: <value>` lines set
// global defaults; a block starting with `name:` describes one device.
// Parse errors cite the offending line and never replace a live registry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tracing::warn;

use zino_snmp::client::DEFAULT_MAX_REPETITIONS;
use zino_snmp::{SessionParams, SnmpVersion};

use crate::ConfigError;

/// One monitored device as described by the pollfile.
#[derive(Debug, Clone)]
pub struct PollDevice {
    pub name: String,
    pub address: IpAddr,
    pub community: String,
    pub snmp_version: SnmpVersion,
    pub port: u16,
    pub timeout: Duration,
    pub retries: u32,
    /// Polling interval for this device's periodic tasks.
    pub interval: Duration,
    pub priority: u32,
    /// DNS domain appended to unqualified names in operator output.
    pub domain: Option<String>,
    /// Collect interface statistics (unused by the state engine itself).
    pub statistics: bool,
    pub do_bgp: bool,
    /// Interfaces whose alias matches are excluded from link monitoring.
    pub ignore_pattern: Option<Regex>,
    /// When set, only interfaces whose alias matches are monitored.
    pub watch_pattern: Option<Regex>,
    pub max_repetitions: Option<u32>,
}

impl PollDevice {
    /// Session parameters for this device's SNMP client.
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            address: self.address,
            port: self.port,
            community: self.community.clone(),
            version: self.snmp_version,
            timeout: self.timeout,
            retries: self.retries,
            max_repetitions: self.max_repetitions.unwrap_or(DEFAULT_MAX_REPETITIONS),
        }
    }
}

impl PartialEq for PollDevice {
    fn eq(&self, other: &Self) -> bool {
        fn pat(p: &Option<Regex>) -> Option<&str> {
            p.as_ref().map(Regex::as_str)
        }
        self.name == other.name
            && self.address == other.address
            && self.community == other.community
            && self.snmp_version == other.snmp_version
            && self.port == other.port
            && self.timeout == other.timeout
            && self.retries == other.retries
            && self.interval == other.interval
            && self.priority == other.priority
            && self.domain == other.domain
            && self.statistics == other.statistics
            && self.do_bgp == other.do_bgp
            && pat(&self.ignore_pattern) == pat(&other.ignore_pattern)
            && pat(&self.watch_pattern) == pat(&other.watch_pattern)
            && self.max_repetitions == other.max_repetitions
    }
}

/// Immutable view of the parsed pollfile. Reloads build a fresh registry
/// and swap it in whole; readers never observe a partial set.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, PollDevice>,
    addresses: HashMap<IpAddr, String>,
}

impl DeviceRegistry {
    pub fn from_devices(devices: Vec<PollDevice>) -> Self {
        let mut by_name = HashMap::new();
        let mut addresses = HashMap::new();
        for device in devices {
            if let Some(previous) = addresses.insert(device.address, device.name.clone()) {
                warn!(
                    address = %device.address,
                    first = %previous,
                    second = %device.name,
                    "two devices share one address; trap attribution uses the last"
                );
            }
            by_name.insert(device.name.clone(), device);
        }
        Self {
            devices: by_name,
            addresses,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PollDevice> {
        self.devices.get(name)
    }

    /// Resolve a trap source address to a device name.
    pub fn device_for_address(&self, address: IpAddr) -> Option<&PollDevice> {
        self.addresses
            .get(&address)
            .and_then(|name| self.devices.get(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PollDevice> {
        self.devices.values()
    }

    /// The `address → name` map, as stored in the state snapshot.
    pub fn address_map(&self) -> HashMap<IpAddr, String> {
        self.addresses.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Defaults {
    community: String,
    snmp_version: SnmpVersion,
    port: u16,
    timeout: Duration,
    retries: u32,
    interval: Duration,
    priority: u32,
    domain: Option<String>,
    statistics: bool,
    do_bgp: bool,
    max_repetitions: Option<u32>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            community: "public".into(),
            snmp_version: SnmpVersion::V2c,
            port: 161,
            timeout: Duration::from_secs(5),
            retries: 3,
            interval: Duration::from_secs(5 * 60),
            priority: 100,
            domain: None,
            statistics: true,
            do_bgp: false,
            max_repetitions: None,
        }
    }
}

struct DeviceBuilder {
    name: String,
    name_line: usize,
    address: Option<IpAddr>,
    community: Option<String>,
    snmp_version: Option<SnmpVersion>,
    port: Option<u16>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    interval: Option<Duration>,
    priority: Option<u32>,
    domain: Option<String>,
    statistics: Option<bool>,
    do_bgp: Option<bool>,
    ignore_pattern: Option<Regex>,
    watch_pattern: Option<Regex>,
    max_repetitions: Option<u32>,
}

impl DeviceBuilder {
    fn new(name: String, name_line: usize) -> Self {
        Self {
            name,
            name_line,
            address: None,
            community: None,
            snmp_version: None,
            port: None,
            timeout: None,
            retries: None,
            interval: None,
            priority: None,
            domain: None,
            statistics: None,
            do_bgp: None,
            ignore_pattern: None,
            watch_pattern: None,
            max_repetitions: None,
        }
    }

    fn finish(self, defaults: &Defaults, path: &str) -> Result<PollDevice, ConfigError> {
        let address = self.address.ok_or_else(|| ConfigError::Pollfile {
            path: path.into(),
            line: self.name_line,
            reason: format!("device '{}' has no address", self.name),
        })?;
        Ok(PollDevice {
            name: self.name,
            address,
            community: self.community.unwrap_or_else(|| defaults.community.clone()),
            snmp_version: self.snmp_version.unwrap_or(defaults.snmp_version),
            port: self.port.unwrap_or(defaults.port),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retries: self.retries.unwrap_or(defaults.retries),
            interval: self.interval.unwrap_or(defaults.interval),
            priority: self.priority.unwrap_or(defaults.priority),
            domain: self.domain.or_else(|| defaults.domain.clone()),
            statistics: self.statistics.unwrap_or(defaults.statistics),
            do_bgp: self.do_bgp.unwrap_or(defaults.do_bgp),
            ignore_pattern: self.ignore_pattern,
            watch_pattern: self.watch_pattern,
            max_repetitions: self.max_repetitions.or(defaults.max_repetitions),
        })
    }
}

/// Parse the pollfile at `path`.
pub fn parse_pollfile(path: &Path) -> Result<DeviceRegistry, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_pollfile_str(&content, &path.display().to_string())
}

/// Parse pollfile content; `path` is used in diagnostics only.
pub fn parse_pollfile_str(content: &str, path: &str) -> Result<DeviceRegistry, ConfigError> {
    let mut defaults = Defaults::default();
    let mut devices: Vec<PollDevice> = Vec::new();
    let mut current: Option<DeviceBuilder> = None;

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() {
            if let Some(builder) = current.take() {
                devices.push(builder.finish(&defaults, path)?);
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or_else(|| ConfigError::Pollfile {
            path: path.into(),
            line: line_no,
            reason: "expected 'key: value'".into(),
        })?;
        let key = key.trim();
        let value = value.trim();

        if let Some(default_key) = key.strip_prefix("default ") {
            apply_default(&mut defaults, default_key.trim(), value, path, line_no)?;
            continue;
        }

        if key == "name" {
            if let Some(builder) = current.take() {
                devices.push(builder.finish(&defaults, path)?);
            }
            current = Some(DeviceBuilder::new(value.to_owned(), line_no));
            continue;
        }

        let Some(builder) = current.as_mut() else {
            return Err(ConfigError::Pollfile {
                path: path.into(),
                line: line_no,
                reason: format!("'{key}' outside a device block"),
            });
        };
        apply_device_key(builder, key, value, path, line_no)?;
    }

    if let Some(builder) = current.take() {
        devices.push(builder.finish(&defaults, path)?);
    }

    Ok(DeviceRegistry::from_devices(devices))
}

fn apply_default(
    defaults: &mut Defaults,
    key: &str,
    value: &str,
    path: &str,
    line: usize,
) -> Result<(), ConfigError> {
    match key {
        "community" => defaults.community = value.to_owned(),
        "snmpversion" => defaults.snmp_version = parse_value(value, path, line, "snmpversion")?,
        "port" => defaults.port = parse_value(value, path, line, "port")?,
        "timeout" => defaults.timeout = Duration::from_secs(parse_value(value, path, line, "timeout")?),
        "retries" => defaults.retries = parse_value(value, path, line, "retries")?,
        "interval" => {
            defaults.interval =
                Duration::from_secs(60 * parse_value::<u64>(value, path, line, "interval")?);
        }
        "priority" => defaults.priority = parse_value(value, path, line, "priority")?,
        "domain" => defaults.domain = Some(value.to_owned()),
        "statistics" => defaults.statistics = parse_yes_no(value, path, line)?,
        "do_bgp" => defaults.do_bgp = parse_yes_no(value, path, line)?,
        "max-repetitions" => {
            defaults.max_repetitions = Some(parse_value(value, path, line, "max-repetitions")?);
        }
        other => {
            return Err(ConfigError::Pollfile {
                path: path.into(),
                line,
                reason: format!("unknown default '{other}'"),
            });
        }
    }
    Ok(())
}

fn apply_device_key(
    builder: &mut DeviceBuilder,
    key: &str,
    value: &str,
    path: &str,
    line: usize,
) -> Result<(), ConfigError> {
    match key {
        "address" => {
            builder.address = Some(value.parse().map_err(|_| ConfigError::Pollfile {
                path: path.into(),
                line,
                reason: format!("invalid address '{value}'"),
            })?);
        }
        "community" => builder.community = Some(value.to_owned()),
        "snmpversion" => {
            builder.snmp_version = Some(parse_value(value, path, line, "snmpversion")?);
        }
        "port" => builder.port = Some(parse_value(value, path, line, "port")?),
        "timeout" => {
            builder.timeout =
                Some(Duration::from_secs(parse_value(value, path, line, "timeout")?));
        }
        "retries" => builder.retries = Some(parse_value(value, path, line, "retries")?),
        "interval" => {
            builder.interval = Some(Duration::from_secs(
                60 * parse_value::<u64>(value, path, line, "interval")?,
            ));
        }
        "priority" => builder.priority = Some(parse_value(value, path, line, "priority")?),
        "domain" => builder.domain = Some(value.to_owned()),
        "statistics" => builder.statistics = Some(parse_yes_no(value, path, line)?),
        "do_bgp" => builder.do_bgp = Some(parse_yes_no(value, path, line)?),
        "ignorepat" => builder.ignore_pattern = Some(parse_regex(value, path, line)?),
        "watchpat" => builder.watch_pattern = Some(parse_regex(value, path, line)?),
        "max-repetitions" => {
            builder.max_repetitions = Some(parse_value(value, path, line, "max-repetitions")?);
        }
        other => {
            return Err(ConfigError::Pollfile {
                path: path.into(),
                line,
                reason: format!("unknown key '{other}'"),
            });
        }
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(
    value: &str,
    path: &str,
    line: usize,
    key: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Pollfile {
        path: path.into(),
        line,
        reason: format!("invalid {key} '{value}'"),
    })
}

fn parse_yes_no(value: &str, path: &str, line: usize) -> Result<bool, ConfigError> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(ConfigError::Pollfile {
            path: path.into(),
            line,
            reason: format!("expected 'yes' or 'no', got '{other}'"),
        }),
    }
}

fn parse_regex(value: &str, path: &str, line: usize) -> Result<Regex, ConfigError> {
    Regex::new(value).map_err(|err| ConfigError::Pollfile {
        path: path.into(),
        line,
        reason: format!("invalid pattern: {err}"),
    })
}

// ── Modification-time watcher ───────────────────────────────────────

/// Tracks the pollfile's mtime so the reload job only reparses on change.
#[derive(Debug)]
pub struct PollfileWatcher {
    path: PathBuf,
    mtime: Option<SystemTime>,
}

impl PollfileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self { path, mtime }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file's mtime moved since the last check.
    pub fn changed(&mut self) -> bool {
        let current = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => Some(mtime),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "cannot stat pollfile");
                return false;
            }
        };
        if current != self.mtime {
            self.mtime = current;
            true
        } else {
            false
        }
    }
}
