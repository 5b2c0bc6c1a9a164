//! zino-core: the state engine of the Zino network monitor.
//!
//! Owns the event model and lifecycle, the per-device observation
//! caches, flap detection, planned maintenance, the polling scheduler
//! and task battery, trap dispatch, and state persistence. The protocol
//! servers in the `zino` binary drive everything through [`Engine`].

pub mod dns;
pub mod engine;
pub mod error;
pub mod flaps;
pub mod model;
pub mod persist;
pub mod scheduler;
pub mod store;
pub mod tasks;
pub mod trap;

pub use engine::{Engine, PollRequest, ReloadDelta, Tuning};
pub use error::CoreError;
pub use persist::Snapshot;
pub use scheduler::Scheduler;
pub use store::{ChangeKind, EventChange, EventStore, PmStore};
