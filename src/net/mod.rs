//! Networking primitives
//!
//! Non-blocking socket wrapper, socket-address helpers for the FTP wire
//! format, and the batched readiness poll that drives the server loop.

pub mod addr;
pub mod connection;
pub mod poll;

pub use connection::Connection;
pub use poll::{PollEntry, poll};
