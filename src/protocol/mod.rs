//! FTP wire protocol
//!
//! Command parsing and numbered-reply formatting shared by the session
//! state machine.

pub mod commands;
pub mod responses;

pub use commands::{Command, parse_command};
pub use responses::format_reply;
