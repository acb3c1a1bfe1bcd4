//! Server core
//!
//! Owns the control listener and the pool of live sessions. Each service
//! iteration builds one poll set covering every descriptor the engine
//! cares about, issues a single readiness poll, and dispatches the
//! results.

pub mod core;

pub use core::Server;
