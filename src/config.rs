//! Configuration management for the Rill FTP server
//!
//! Loads settings from `config.toml` with `RILL_FTP_*` environment
//! overrides and validates them before the server starts.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete server configuration.
///
/// All values are fixed for the lifetime of the server; there is no
/// runtime reconfiguration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind the FTP control listener
    pub bind_address: String,

    /// Port for the FTP control listener (0 selects an ephemeral port)
    pub control_port: u16,

    /// Root directory served to clients; no resolved path may escape it
    pub server_root: String,

    /// Listen backlog for the control listener
    pub listen_backlog: i32,

    /// Upper bound on one readiness-poll call, in milliseconds.
    /// Bounds loop latency for the embedding host; not an idle timeout.
    pub poll_timeout_ms: u64,

    /// Size of the per-session transfer buffer
    pub xfer_buffer_size: usize,

    /// Kernel recv/send buffer size requested for data sockets
    pub sock_buffer_size: usize,

    /// Fixed login credentials; both or neither must be set
    pub username: Option<String>,
    pub password: Option<String>,

    /// Whether `anonymous` logins are accepted with any password
    pub anonymous: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            control_port: 2121,
            server_root: "./server_root".to_string(),
            listen_backlog: 10,
            poll_timeout_ms: 16,
            xfer_buffer_size: 64 * 1024,
            sock_buffer_size: 64 * 1024,
            username: None,
            password: None,
            anonymous: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `config.toml` (if present) with environment
    /// overrides, falling back to defaults for missing keys.
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("RILL_FTP"))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.server_root.is_empty() {
            return Err(config::ConfigError::Message(
                "server_root cannot be empty".into(),
            ));
        }

        if self.listen_backlog <= 0 {
            return Err(config::ConfigError::Message(
                "listen_backlog must be greater than 0".into(),
            ));
        }

        if self.xfer_buffer_size < 1024 {
            return Err(config::ConfigError::Message(
                "xfer_buffer_size must be at least 1024 bytes".into(),
            ));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(config::ConfigError::Message(
                "username and password must be configured together".into(),
            ));
        }

        if self.username.is_none() && !self.anonymous {
            return Err(config::ConfigError::Message(
                "no credentials configured and anonymous logins disabled".into(),
            ));
        }

        Ok(())
    }

    /// Bind address and control port as a socket-address string.
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    /// Server root as a PathBuf.
    pub fn server_root_path(&self) -> PathBuf {
        PathBuf::from(&self.server_root)
    }

    /// Poll timeout as a Duration.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_credentials_must_pair() {
        let config = ServerConfig {
            username: Some("alice".to_string()),
            password: None,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_login_path_rejected() {
        let config = ServerConfig {
            anonymous: false,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_control_socket_format() {
        let config = ServerConfig::default();
        assert_eq!(config.control_socket(), "0.0.0.0:2121");
    }
}
