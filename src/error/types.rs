//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Startup errors. Any of these is listener-fatal: the server does not
/// start and the error is surfaced to the host.
#[derive(Debug)]
pub enum ServerError {
    InvalidBindAddress(String),
    CreateSocket(io::Error),
    Configure(io::Error),
    Bind(SocketAddr, io::Error),
    Listen(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::InvalidBindAddress(addr) => write!(f, "Invalid bind address: {}", addr),
            ServerError::CreateSocket(e) => write!(f, "Failed to create listen socket: {}", e),
            ServerError::Configure(e) => write!(f, "Failed to configure listen socket: {}", e),
            ServerError::Bind(addr, e) => write!(f, "Failed to bind to {}: {}", addr, e),
            ServerError::Listen(e) => write!(f, "Failed to listen: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

/// Virtual-path resolution errors.
#[derive(Debug, PartialEq, Eq)]
pub enum PathError {
    /// A `..` segment would resolve outside the served root.
    Traversal(String),
    /// Empty or otherwise unusable path argument.
    InvalidPath(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Traversal(p) => write!(f, "Path traversal attempt: {}", p),
            PathError::InvalidPath(p) => write!(f, "Invalid path: {}", p),
        }
    }
}

impl std::error::Error for PathError {}

/// Authentication errors.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    UserNotFound(String),
    InvalidPassword(String),
    MalformedInput(String),
}

impl AuthError {
    /// Message suitable for the client-visible reply line.
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::UserNotFound(_) => "Invalid username",
            AuthError::InvalidPassword(_) => "Invalid password",
            AuthError::MalformedInput(_) => "Malformed login input",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UserNotFound(u) => write!(f, "User not found: {}", u),
            AuthError::InvalidPassword(u) => write!(f, "Invalid password for user: {}", u),
            AuthError::MalformedInput(s) => write!(f, "Malformed input: {}", s),
        }
    }
}

impl std::error::Error for AuthError {}

/// io::Error helper: whether an error is the transient would-block
/// condition rather than a genuine failure.
pub fn is_would_block(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
}
