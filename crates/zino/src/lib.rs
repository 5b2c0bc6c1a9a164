//! The Zino daemon: protocol servers and wiring around `zino-core`.
//!
//! The binary in `main.rs` drives this; the library split exists so the
//! integration tests can exercise the servers on ephemeral ports.

pub mod auth;
pub mod server;
