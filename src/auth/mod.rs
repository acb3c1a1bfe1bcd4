//! Authentication system
//!
//! Login policy is an external collaborator of the protocol engine: the
//! credential set comes from configuration and the session only asks
//! whether a username/password pair is acceptable.

pub mod credentials;
pub mod validator;

pub use credentials::Credentials;
pub use validator::{validate_password, validate_user};
