//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server.

pub mod types;

pub use types::{AuthError, PathError, ServerError, is_would_block};
