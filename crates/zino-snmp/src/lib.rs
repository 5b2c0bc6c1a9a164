//! SNMP abstraction layer for Zino.
//!
//! The wire transport (BER encoding, UDP sockets, engine discovery) is an
//! external collaborator -- this crate defines the seam it plugs into:
//! the [`SnmpClient`] trait for GET / GET-NEXT / GET-BULK, the
//! [`TrapMessage`] channel that decoded notifications arrive on, and the
//! value/OID types shared by both. The in-memory [`MockSnmp`] backend
//! implements the client trait for the test-suite and for dry runs.

pub mod agent;
pub mod client;
pub mod error;
pub mod mock;
pub mod oid;
pub mod oids;
pub mod trap;
pub mod value;

pub use agent::UptimeAgent;
pub use client::{ClientFactory, SessionParams, SnmpClient, SnmpVersion, walk};
pub use error::SnmpError;
pub use mock::MockSnmp;
pub use oid::Oid;
pub use trap::{TrapMessage, TrapReceiver, TrapSender, trap_channel};
pub use value::{SnmpValue, VarBind};
