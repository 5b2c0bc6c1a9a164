// ── State stores ──

pub mod events;
pub mod pm;

pub use events::{CLOSED_RETENTION, ChangeKind, EventChange, EventStore};
pub use pm::PmStore;
