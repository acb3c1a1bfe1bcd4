//! Credential storage
//!
//! Holds the login policy derived from configuration: an optional fixed
//! user/password pair and whether anonymous logins are accepted.

use crate::config::ServerConfig;

/// Login policy for one server instance.
#[derive(Debug, Clone)]
pub struct Credentials {
    fixed: Option<(String, String)>,
    anonymous: bool,
}

impl Credentials {
    pub fn from_config(config: &ServerConfig) -> Self {
        let fixed = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Self {
            fixed,
            anonymous: config.anonymous,
        }
    }

    pub fn fixed(&self) -> Option<(&str, &str)> {
        self.fixed.as_ref().map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Whether `username` is one of the anonymous login names and
    /// anonymous access is enabled.
    pub fn is_anonymous(&self, username: &str) -> bool {
        self.anonymous && (username == "anonymous" || username == "ftp")
    }
}
