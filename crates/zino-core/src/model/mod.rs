// ── Domain model ──

pub mod device;
pub mod event;
pub mod pm;

pub use device::{AlarmCount, BfdSession, BgpPeer, BgpStyle, DeviceState, IfStatus, Port};
pub use event::{
    AlarmColor, BfdState, BgpAdminStatus, BgpOperState, Event, EventDetails, EventId, EventKey,
    EventState, EventType, LogEntry, PortState, ReachabilityState, SubIndex,
};
pub use pm::{PlannedMaintenance, PmId, PmMatchType, PmTarget};
