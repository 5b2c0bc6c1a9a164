// ── Event domain model ──
//
// An event (or "case") is one tracked anomaly on one device. Its natural
// key is (router, type, subindex); at most one non-closed event exists
// per key. Per-type payloads live in the `EventDetails` variant; the
// hyphenated legacy attribute names only appear in `attr_map`, which is
// what the protocol layer and the change-notification diff both read.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flaps::FlapState;

pub type EventId = u32;

// ── Lifecycle states ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    /// Pre-commit staging state, visible only to the creator.
    Embryonic,
    Open,
    Working,
    Waiting,
    #[serde(rename = "confirm-wait")]
    ConfirmWait,
    Ignored,
    Closed,
}

impl EventState {
    /// Whether an operator may move an event from `self` to `to`.
    ///
    /// `closed` is terminal, and `embryonic` is never a protocol-level
    /// source or target; everything else is an operator call.
    pub fn can_transition_to(self, to: EventState) -> bool {
        !matches!(self, Self::Closed | Self::Embryonic) && !matches!(to, Self::Embryonic)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embryonic => "embryonic",
            Self::Open => "open",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::ConfirmWait => "confirm-wait",
            Self::Ignored => "ignored",
            Self::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

impl FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embryonic" => Ok(Self::Embryonic),
            "open" => Ok(Self::Open),
            "working" => Ok(Self::Working),
            "waiting" => Ok(Self::Waiting),
            "confirm-wait" => Ok(Self::ConfirmWait),
            "ignored" => Ok(Self::Ignored),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown event state '{other}'")),
        }
    }
}

// ── Natural key ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Reachability,
    Portstate,
    Bgp,
    Bfd,
    Alarm,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reachability => "reachability",
            Self::Portstate => "portstate",
            Self::Bgp => "bgp",
            Self::Bfd => "bfd",
            Self::Alarm => "alarm",
        };
        write!(f, "{name}")
    }
}

/// The per-type discriminator within one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubIndex {
    None,
    Interface(u32),
    Peer(String),
    BfdSession(u32),
    Alarm(AlarmColor),
}

impl fmt::Display for SubIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "-"),
            Self::Interface(ifindex) => write!(f, "{ifindex}"),
            Self::Peer(peer) => write!(f, "{peer}"),
            Self::BfdSession(discr) => write!(f, "{discr}"),
            Self::Alarm(color) => write!(f, "{color}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub router: String,
    pub kind: EventType,
    pub subindex: SubIndex,
}

// ── Per-type payloads ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmColor {
    Red,
    Yellow,
}

impl fmt::Display for AlarmColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Red => write!(f, "red"),
            Self::Yellow => write!(f, "yellow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityState {
    Reachable,
    #[serde(rename = "no-response")]
    NoResponse,
}

impl fmt::Display for ReachabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => write!(f, "reachable"),
            Self::NoResponse => write!(f, "no-response"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Up,
    Down,
    #[serde(rename = "adminDown")]
    AdminDown,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::AdminDown => write!(f, "adminDown"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpOperState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

impl BgpOperState {
    pub fn from_mib(value: i64) -> Self {
        match value {
            2 => Self::Connect,
            3 => Self::Active,
            4 => Self::OpenSent,
            5 => Self::OpenConfirm,
            6 => Self::Established,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for BgpOperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connect => "connect",
            Self::Active => "active",
            Self::OpenSent => "opensent",
            Self::OpenConfirm => "openconfirm",
            Self::Established => "established",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpAdminStatus {
    Halted,
    Running,
}

impl BgpAdminStatus {
    pub fn from_mib(value: i64) -> Self {
        if value == zino_snmp::oids::BGP_ADMIN_RUNNING {
            Self::Running
        } else {
            Self::Halted
        }
    }
}

impl fmt::Display for BgpAdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted => write!(f, "halted"),
            Self::Running => write!(f, "running"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BfdState {
    AdminDown,
    Down,
    Init,
    Up,
}

impl BfdState {
    pub fn from_mib(value: i64) -> Self {
        match value {
            1 => Self::AdminDown,
            3 => Self::Init,
            4 => Self::Up,
            _ => Self::Down,
        }
    }
}

impl fmt::Display for BfdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdminDown => "adminDown",
            Self::Down => "down",
            Self::Init => "init",
            Self::Up => "up",
        };
        write!(f, "{name}")
    }
}

/// Type-specific event payload; serialized with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventDetails {
    Reachability {
        reachability: ReachabilityState,
    },
    Portstate {
        ifindex: u32,
        /// ifDescr of the port, e.g. "ge-1/0/10".
        port: String,
        /// ifAlias -- the circuit description operators recognize.
        descr: String,
        portstate: PortState,
        flaps: u32,
        flapstate: FlapState,
        /// Accumulated time spent down since the event opened.
        ac_down: Duration,
    },
    Bgp {
        peer: String,
        remote_addr: Option<IpAddr>,
        remote_as: u32,
        /// Seconds the peering has been established.
        peer_uptime: u32,
        operational_state: BgpOperState,
        admin_status: BgpAdminStatus,
    },
    Bfd {
        session_discr: u32,
        bfd_state: BfdState,
        bfd_addr: Option<IpAddr>,
        bfd_discr: Option<u32>,
        neigh_rdns: String,
    },
    Alarm {
        alarm_type: AlarmColor,
        alarm_count: u32,
    },
}

impl EventDetails {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Reachability { .. } => EventType::Reachability,
            Self::Portstate { .. } => EventType::Portstate,
            Self::Bgp { .. } => EventType::Bgp,
            Self::Bfd { .. } => EventType::Bfd,
            Self::Alarm { .. } => EventType::Alarm,
        }
    }

    pub fn subindex(&self) -> SubIndex {
        match self {
            Self::Reachability { .. } => SubIndex::None,
            Self::Portstate { ifindex, .. } => SubIndex::Interface(*ifindex),
            Self::Bgp { peer, .. } => SubIndex::Peer(peer.clone()),
            Self::Bfd { session_discr, .. } => SubIndex::BfdSession(*session_discr),
            Self::Alarm { alarm_type, .. } => SubIndex::Alarm(*alarm_type),
        }
    }
}

// ── History / log entries ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub text: String,
}

impl LogEntry {
    pub fn new(ts: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            ts,
            text: text.into(),
        }
    }
}

// ── The event itself ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub router: String,
    pub state: EventState,
    pub priority: u32,
    pub opened: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub closed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub polladdr: Option<IpAddr>,
    /// Short description of the most recent development.
    #[serde(default)]
    pub lastevent: String,
    /// Operator-facing audit trail; every state change appends here.
    #[serde(default)]
    pub history: Vec<LogEntry>,
    /// Machine-generated detail log.
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl Event {
    pub fn new(
        id: EventId,
        router: impl Into<String>,
        details: EventDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            router: router.into(),
            state: EventState::Embryonic,
            priority: 100,
            opened: now,
            updated: now,
            closed: None,
            polladdr: None,
            lastevent: String::new(),
            history: Vec::new(),
            log: Vec::new(),
            details,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            router: self.router.clone(),
            kind: self.details.event_type(),
            subindex: self.details.subindex(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.details.event_type()
    }

    /// Change state, recording the transition in history.
    pub fn set_state(&mut self, to: EventState, now: DateTime<Utc>) {
        if self.state == to {
            return;
        }
        self.history.push(LogEntry::new(
            now,
            format!("state change {} -> {}", self.state, to),
        ));
        self.state = to;
        if to == EventState::Closed {
            self.closed = Some(now);
        }
    }

    pub fn add_history(&mut self, now: DateTime<Utc>, text: impl Into<String>) {
        self.history.push(LogEntry::new(now, text));
    }

    pub fn add_log(&mut self, now: DateTime<Utc>, text: impl Into<String>) {
        let text = text.into();
        self.lastevent.clone_from(&text);
        self.log.push(LogEntry::new(now, text));
    }

    /// The protocol-visible attribute map, legacy names included.
    ///
    /// Both GETATTRS and the commit-time change diff read this, so a
    /// notification is emitted for exactly the attributes a client can
    /// observe changing.
    pub fn attr_map(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("id".into(), self.id.to_string());
        attrs.insert("router".into(), self.router.clone());
        attrs.insert("type".into(), self.event_type().to_string());
        attrs.insert("state".into(), self.state.to_string());
        attrs.insert("priority".into(), self.priority.to_string());
        attrs.insert("opened".into(), self.opened.timestamp().to_string());
        attrs.insert("updated".into(), self.updated.timestamp().to_string());
        if let Some(closed) = self.closed {
            attrs.insert("closed".into(), closed.timestamp().to_string());
        }
        if let Some(polladdr) = self.polladdr {
            attrs.insert("polladdr".into(), polladdr.to_string());
        }
        if !self.lastevent.is_empty() {
            attrs.insert("lastevent".into(), self.lastevent.clone());
        }

        match &self.details {
            EventDetails::Reachability { reachability } => {
                attrs.insert("reachability".into(), reachability.to_string());
            }
            EventDetails::Portstate {
                ifindex,
                port,
                descr,
                portstate,
                flaps,
                flapstate,
                ac_down,
            } => {
                attrs.insert("ifindex".into(), ifindex.to_string());
                attrs.insert("port".into(), port.clone());
                attrs.insert("descr".into(), descr.clone());
                attrs.insert("portstate".into(), portstate.to_string());
                attrs.insert("flaps".into(), flaps.to_string());
                attrs.insert("flapstate".into(), flapstate.to_string());
                attrs.insert("ac-down".into(), ac_down.as_secs().to_string());
            }
            EventDetails::Bgp {
                peer,
                remote_addr,
                remote_as,
                peer_uptime,
                operational_state,
                admin_status,
            } => {
                attrs.insert("peer".into(), peer.clone());
                if let Some(addr) = remote_addr {
                    attrs.insert("remote-addr".into(), addr.to_string());
                }
                attrs.insert("remote-AS".into(), remote_as.to_string());
                attrs.insert("peer-uptime".into(), peer_uptime.to_string());
                attrs.insert("bgpOS".into(), operational_state.to_string());
                attrs.insert("bgpAS".into(), admin_status.to_string());
            }
            EventDetails::Bfd {
                session_discr,
                bfd_state,
                bfd_addr,
                bfd_discr,
                neigh_rdns,
            } => {
                attrs.insert("bfdIx".into(), session_discr.to_string());
                attrs.insert("bfdState".into(), bfd_state.to_string());
                if let Some(addr) = bfd_addr {
                    attrs.insert("bfdAddr".into(), addr.to_string());
                }
                if let Some(discr) = bfd_discr {
                    attrs.insert("bfdDiscr".into(), discr.to_string());
                }
                attrs.insert("Neigh-rDNS".into(), neigh_rdns.clone());
            }
            EventDetails::Alarm {
                alarm_type,
                alarm_count,
            } => {
                attrs.insert("alarm-type".into(), alarm_type.to_string());
                attrs.insert("alarm-count".into(), alarm_count.to_string());
            }
        }

        attrs
    }
}
