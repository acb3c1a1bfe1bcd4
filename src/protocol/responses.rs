//! FTP reply handling
//!
//! Reply codes used by the server and the single-line reply formatter.
//! 1xx informational, 2xx success, 3xx intermediate, 4xx transient error,
//! 5xx permanent error.

pub const DATA_READY: u16 = 150;

pub const OK: u16 = 200;
pub const SUPERFLUOUS: u16 = 202;
pub const SYSTEM_STATUS: u16 = 211;
pub const FILE_STATUS: u16 = 213;
pub const HELP_MESSAGE: u16 = 214;
pub const SYSTEM_TYPE: u16 = 215;
pub const READY: u16 = 220;
pub const CLOSING: u16 = 221;
pub const NO_TRANSFER: u16 = 225;
pub const TRANSFER_COMPLETE: u16 = 226;
pub const ENTERING_PASSIVE: u16 = 227;
pub const LOGIN_SUCCESS: u16 = 230;
pub const FILE_ACTION_OK: u16 = 250;
pub const PATH_CREATED: u16 = 257;

pub const PASSWORD_REQUIRED: u16 = 331;
pub const PENDING_INFO: u16 = 350;

pub const CANT_OPEN_DATA: u16 = 425;
pub const TRANSFER_ABORTED: u16 = 426;
pub const ACTION_NOT_TAKEN: u16 = 450;
pub const LOCAL_ERROR: u16 = 451;

pub const SYNTAX_ERROR: u16 = 501;
pub const NOT_IMPLEMENTED: u16 = 502;
pub const BAD_SEQUENCE: u16 = 503;
pub const PARAM_UNSUPPORTED: u16 = 504;
pub const NOT_LOGGED_IN: u16 = 530;
pub const FILE_UNAVAILABLE: u16 = 550;
pub const NAME_NOT_ALLOWED: u16 = 553;

/// Format a single FTP reply line.
pub fn format_reply(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}
