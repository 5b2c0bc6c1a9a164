// ── Per-device observation cache ──
//
// Mirrors the last SNMP-derived facts for one device. Created on first
// successful poll, mutated only by task runs and trap handlers, dropped
// when the device leaves the pollfile. Serialized whole into the state
// snapshot; unknown fields in old snapshots are ignored on load.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::event::{BfdState, BgpAdminStatus, BgpOperState};

/// ifOperStatus / ifAdminStatus enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfStatus {
    Up,
    Down,
    Testing,
    Dormant,
    NotPresent,
    LowerLayerDown,
    Unknown,
}

impl IfStatus {
    pub fn from_mib(value: i64) -> Self {
        match value {
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::Testing,
            5 => Self::Dormant,
            6 => Self::NotPresent,
            7 => Self::LowerLayerDown,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub ifindex: u32,
    #[serde(default)]
    pub ifdescr: String,
    #[serde(default)]
    pub ifalias: String,
    pub oper_status: IfStatus,
    pub admin_status: IfStatus,
    /// sysUpTime ticks at the port's last state change.
    #[serde(default)]
    pub last_change: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpPeer {
    /// Subindex string: the peer's table index, usually its address.
    pub peer_id: String,
    #[serde(default)]
    pub remote_addr: Option<IpAddr>,
    #[serde(default)]
    pub remote_as: u32,
    pub oper_state: BgpOperState,
    pub admin_status: BgpAdminStatus,
    /// Seconds since the session last entered established.
    #[serde(default)]
    pub uptime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdSession {
    pub discriminator: u32,
    pub state: BfdState,
    #[serde(default)]
    pub addr: Option<IpAddr>,
    #[serde(default)]
    pub addr_type: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlarmCount {
    pub red: u32,
    pub yellow: u32,
}

/// Which BGP MIB family the device answered the style probe with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpStyle {
    Juniper,
    Cisco,
    Rfc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub name: String,

    #[serde(default = "default_true")]
    pub reachable_in_last_run: bool,
    /// Consecutive failed reachability probes.
    #[serde(default)]
    pub unreachable_count: u32,
    /// Last observed sysUpTime, for reboot detection.
    #[serde(default)]
    pub last_sysuptime: Option<u32>,

    #[serde(default)]
    pub interfaces: BTreeMap<u32, Port>,
    #[serde(default)]
    pub bgp_peers: BTreeMap<String, BgpPeer>,
    #[serde(default)]
    pub bfd_sessions: BTreeMap<u32, BfdSession>,
    /// Chassis alarm counts; `None` until the first alarm poll (Juniper only).
    #[serde(default)]
    pub alarms: Option<AlarmCount>,

    #[serde(default)]
    pub is_juniper: bool,
    #[serde(default)]
    pub is_cisco: bool,
    /// Vendor probe completed; the flags above are meaningful.
    #[serde(default)]
    pub vendor_probed: bool,

    #[serde(default)]
    pub bgp_style: Option<BgpStyle>,
}

fn default_true() -> bool {
    true
}

impl DeviceState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reachable_in_last_run: true,
            unreachable_count: 0,
            last_sysuptime: None,
            interfaces: BTreeMap::new(),
            bgp_peers: BTreeMap::new(),
            bfd_sessions: BTreeMap::new(),
            alarms: None,
            is_juniper: false,
            is_cisco: false,
            vendor_probed: false,
            bgp_style: None,
        }
    }

    /// Whether the interface table has been populated at least once.
    /// The first walk only establishes the baseline and raises no events.
    pub fn has_interface_baseline(&self) -> bool {
        !self.interfaces.is_empty()
    }
}
