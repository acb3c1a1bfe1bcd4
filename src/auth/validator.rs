//! Authentication validator
//!
//! Implements FTP user authentication against the configured credential
//! policy, with basic input hygiene on both fields.

use crate::auth::credentials::Credentials;
use crate::error::AuthError;

const MAX_FIELD_LENGTH: usize = 64;

/// Basic input sanitation for usernames and passwords.
fn is_valid_input(input: &str, allow_empty: bool) -> bool {
    (allow_empty || !input.trim().is_empty())
        && input.len() <= MAX_FIELD_LENGTH
        && !input.contains(['\r', '\n', '\0'])
}

/// Validates that the given username is acceptable for login.
pub fn validate_user(credentials: &Credentials, username: &str) -> Result<(), AuthError> {
    if !is_valid_input(username, false) {
        return Err(AuthError::MalformedInput("Invalid username format".into()));
    }

    if credentials.is_anonymous(username) {
        return Ok(());
    }

    match credentials.fixed() {
        Some((user, _)) if user == username => Ok(()),
        _ => Err(AuthError::UserNotFound(username.to_string())),
    }
}

/// Validates the password for a username previously accepted by
/// `validate_user`. Anonymous users may present any password.
pub fn validate_password(
    credentials: &Credentials,
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    if !is_valid_input(password, true) {
        return Err(AuthError::MalformedInput("Invalid password format".into()));
    }

    if credentials.is_anonymous(username) {
        return Ok(());
    }

    match credentials.fixed() {
        Some((user, pass)) if user == username && pass == password => Ok(()),
        Some((user, _)) if user == username => {
            Err(AuthError::InvalidPassword(username.to_string()))
        }
        _ => Err(AuthError::UserNotFound(username.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn credentials(username: Option<&str>, password: Option<&str>, anonymous: bool) -> Credentials {
        let config = ServerConfig {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            anonymous,
            ..ServerConfig::default()
        };
        Credentials::from_config(&config)
    }

    #[test]
    fn test_anonymous_login() {
        let creds = credentials(None, None, true);
        assert!(validate_user(&creds, "anonymous").is_ok());
        assert!(validate_user(&creds, "ftp").is_ok());
        assert!(validate_password(&creds, "anonymous", "").is_ok());
        assert!(validate_password(&creds, "anonymous", "whatever").is_ok());
    }

    #[test]
    fn test_anonymous_disabled() {
        let creds = credentials(Some("alice"), Some("secret"), false);
        assert!(validate_user(&creds, "anonymous").is_err());
    }

    #[test]
    fn test_fixed_credentials() {
        let creds = credentials(Some("alice"), Some("secret"), false);
        assert!(validate_user(&creds, "alice").is_ok());
        assert!(validate_user(&creds, "bob").is_err());
        assert!(validate_password(&creds, "alice", "secret").is_ok());
        assert_eq!(
            validate_password(&creds, "alice", "wrong"),
            Err(AuthError::InvalidPassword("alice".to_string()))
        );
    }

    #[test]
    fn test_malformed_input_rejected() {
        let creds = credentials(None, None, true);
        assert!(validate_user(&creds, "").is_err());
        assert!(validate_user(&creds, "a\r\nb").is_err());
        assert!(validate_user(&creds, &"x".repeat(65)).is_err());
    }
}
