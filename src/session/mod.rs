//! Module `session`
//!
//! Per-client FTP protocol state machine. A session owns its control
//! connection, at most one pending/established data connection, and the
//! I/O buffers between them. It never blocks: the server reports socket
//! readiness and the session advances exactly one step per report.

mod command;
mod transfer;

use log::{debug, error, info};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::auth::Credentials;
use crate::buffer::IoBuffer;
use crate::config::ServerConfig;
use crate::error::is_would_block;
use crate::net::Connection;
use crate::net::poll::{POLLIN, POLLOUT, PollEntry};
use crate::protocol::responses;

pub const COMMAND_BUFFER_SIZE: usize = 4096;
pub const RESPONSE_BUFFER_SIZE: usize = 32 * 1024;

/// Which of a session's sockets a poll entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Control,
    PassiveListener,
    Data,
}

/// Protocol phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Reading and dispatching commands on the control connection.
    Command,
    /// Waiting for a passive peer to connect, or for an active connect to
    /// complete.
    DataConnect,
    /// Pumping bytes between the data connection and the file/listing
    /// source or sink.
    DataTransfer,
}

/// Listing flavor of an active directory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListFormat {
    /// LIST: one detail line per entry.
    Long,
    /// NLST: plain path names.
    Names,
    /// STAT: detail lines over the control connection.
    Status,
}

/// Kind of the active transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    List(ListFormat),
    Retrieve,
    Store,
}

/// One connected client.
pub struct Session {
    // field order doubles as teardown order: data sockets close before the
    // control socket
    pasv: Option<Connection>,
    data: Option<Connection>,
    ctrl: Option<Connection>,

    config: Arc<ServerConfig>,
    credentials: Credentials,
    peer: SocketAddr,

    command_buffer: IoBuffer,
    response_buffer: IoBuffer,
    xfer_buffer: IoBuffer,

    cwd: String,
    /// Directory an in-progress listing walks; NLST builds full names
    /// against it.
    lwd: String,
    rename_from: Option<String>,

    port_addr: Option<SocketAddr>,
    pasv_pending: bool,
    port_pending: bool,

    restart_position: u64,
    file_position: u64,
    file_size: u64,

    state: SessionState,
    active: Option<Transfer>,
    /// STAT listings stream over the control connection instead of a data
    /// connection.
    data_on_control: bool,

    file: Option<fs::File>,
    dir: Option<fs::ReadDir>,

    username: Option<String>,
    user_ok: bool,
    logged_in: bool,
    closing: bool,
}

impl Session {
    pub fn create(ctrl: Connection, config: Arc<ServerConfig>, credentials: Credentials) -> Session {
        let _ = ctrl.set_nonblocking(true);
        let peer = ctrl
            .peer_addr()
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

        let xfer_buffer_size = config.xfer_buffer_size;
        let mut session = Session {
            pasv: None,
            data: None,
            ctrl: Some(ctrl),
            config,
            credentials,
            peer,
            command_buffer: IoBuffer::new(COMMAND_BUFFER_SIZE),
            response_buffer: IoBuffer::new(RESPONSE_BUFFER_SIZE),
            xfer_buffer: IoBuffer::new(xfer_buffer_size),
            cwd: "/".to_string(),
            lwd: "/".to_string(),
            rename_from: None,
            port_addr: None,
            pasv_pending: false,
            port_pending: false,
            restart_position: 0,
            file_position: 0,
            file_size: 0,
            state: SessionState::Command,
            active: None,
            data_on_control: false,
            file: None,
            dir: None,
            username: None,
            user_ok: false,
            logged_in: false,
            closing: false,
        };

        session.send_reply(responses::READY, "Welcome to Rill FTP server");
        session
    }

    /// Whether every socket of this session is gone; the server reaps dead
    /// sessions after each dispatch cycle.
    pub fn dead(&self) -> bool {
        self.ctrl.is_none() && self.pasv.is_none() && self.data.is_none()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Descriptors this session wants polled, with their interest flags.
    pub fn poll_wants(&self) -> Vec<(Channel, RawFd, i16)> {
        let mut wants = Vec::with_capacity(2);

        if let Some(ctrl) = &self.ctrl {
            let mut events = POLLIN;
            if !self.response_buffer.is_empty() {
                events |= POLLOUT;
            }
            if self.data_on_control && self.state == SessionState::DataTransfer {
                events |= POLLOUT;
            }
            wants.push((Channel::Control, ctrl.fd(), events));
        }

        match self.state {
            SessionState::Command => {}
            SessionState::DataConnect => {
                if self.pasv_pending {
                    // waiting for the passive peer to arrive
                    if let Some(pasv) = &self.pasv {
                        wants.push((Channel::PassiveListener, pasv.fd(), POLLIN));
                    }
                } else if let Some(data) = &self.data {
                    // waiting for an active connect to complete
                    wants.push((Channel::Data, data.fd(), POLLOUT));
                }
            }
            SessionState::DataTransfer => {
                if let Some(data) = &self.data {
                    let events = if self.active == Some(Transfer::Store) {
                        POLLIN
                    } else {
                        POLLOUT
                    };
                    wants.push((Channel::Data, data.fd(), events));
                }
            }
        }

        wants
    }

    /// Advance the state machine one step for one readiness report.
    pub fn advance(&mut self, channel: Channel, entry: PollEntry) {
        match channel {
            Channel::Control => self.advance_control(entry),
            Channel::PassiveListener => self.advance_passive(entry),
            Channel::Data => self.advance_data(entry),
        }
    }

    fn advance_control(&mut self, entry: PollEntry) {
        if self.ctrl.is_none() {
            return;
        }

        if entry.writable() {
            self.write_response();

            // a STAT listing streams over the control connection once the
            // queued replies have drained
            if self.ctrl.is_some()
                && self.data_on_control
                && self.state == SessionState::DataTransfer
                && self.response_buffer.is_empty()
            {
                while self.transfer_step() {}
            }
        }

        if self.ctrl.is_some() && entry.readable() {
            self.read_command();
        }

        if self.ctrl.is_some() && entry.failed() {
            self.teardown();
        }
    }

    fn advance_passive(&mut self, entry: PollEntry) {
        if self.state != SessionState::DataConnect || self.pasv.is_none() {
            return;
        }

        if entry.failed() {
            self.send_reply(responses::TRANSFER_ABORTED, "Data connection failed");
            self.set_state(SessionState::Command, true, true);
            return;
        }

        if entry.readable() {
            self.data_accept();
        }
    }

    fn advance_data(&mut self, entry: PollEntry) {
        if self.data.is_none() {
            return;
        }

        match self.state {
            SessionState::Command => {}
            SessionState::DataConnect => {
                if entry.failed() {
                    self.send_reply(responses::TRANSFER_ABORTED, "Data connection failed");
                    self.set_state(SessionState::Command, true, true);
                } else if entry.writable() {
                    // active-mode connect completed
                    if let Some(peer) = self.data.as_ref().and_then(|d| d.peer_addr()) {
                        info!("{} data connection established to {}", self.peer, peer);
                    }
                    self.send_reply(responses::DATA_READY, "Ready");
                    self.set_state(SessionState::DataTransfer, true, false);
                }
            }
            SessionState::DataTransfer => {
                if entry.failed() {
                    self.send_reply(responses::TRANSFER_ABORTED, "Data connection failed");
                    self.set_state(SessionState::Command, true, true);
                } else if entry.readable() || entry.writable() {
                    while self.transfer_step() {}
                }
            }
        }
    }

    fn read_command(&mut self) {
        if self.command_buffer.free_size() == 0 {
            error!("{} exceeded command buffer size", self.peer);
            self.teardown();
            return;
        }

        let Some(ctrl) = &self.ctrl else { return };
        match ctrl.read_buffer(&mut self.command_buffer) {
            Err(e) if is_would_block(&e) => return,
            Err(_) => {
                self.teardown();
                return;
            }
            Ok(0) => {
                info!("{} closed connection", self.peer);
                self.teardown();
                return;
            }
            Ok(_) => {}
        }

        // dispatch every complete line in the buffer
        while self.ctrl.is_some() {
            let Some((line, consumed)) = extract_line(self.command_buffer.used_area()) else {
                return;
            };
            self.command_buffer.mark_free(consumed);
            self.command_buffer.coalesce();
            self.dispatch(&line);
        }
    }

    fn write_response(&mut self) {
        if self.response_buffer.is_empty() {
            if self.closing {
                self.teardown();
            }
            return;
        }

        let Some(ctrl) = &self.ctrl else { return };
        match ctrl.write_buffer(&mut self.response_buffer) {
            Err(e) if is_would_block(&e) => {}
            Err(_) | Ok(0) => {
                self.teardown();
                return;
            }
            Ok(_) => {}
        }

        self.response_buffer.coalesce();

        if self.closing && self.response_buffer.is_empty() {
            self.teardown();
        }
    }

    /// Queue one numbered reply line and try to flush it immediately.
    fn send_reply(&mut self, code: u16, message: &str) {
        self.send_raw(&responses::format_reply(code, message));
    }

    /// Queue raw (possibly multi-line) reply text and try to flush it
    /// immediately. Response-buffer overflow and control-socket errors are
    /// session-fatal.
    fn send_raw(&mut self, response: &str) {
        if self.ctrl.is_none() {
            return;
        }

        debug!("{} <-- {}", self.peer, response.trim_end());

        if self.response_buffer.free_size() < response.len() {
            error!("{} response buffer overflow", self.peer);
            self.teardown();
            return;
        }

        let len = response.len();
        self.response_buffer.free_area()[..len].copy_from_slice(response.as_bytes());
        self.response_buffer.mark_used(len);

        let Some(ctrl) = &self.ctrl else { return };
        match ctrl.write_buffer(&mut self.response_buffer) {
            Err(e) if is_would_block(&e) => {}
            Err(_) => {
                self.teardown();
                return;
            }
            Ok(_) => {}
        }

        self.response_buffer.coalesce();
    }

    /// Switch protocol phase, optionally discarding the passive listener
    /// and the data connection. Returning to the command phase clears all
    /// transfer state, including the one-shot restart offset.
    fn set_state(&mut self, state: SessionState, close_pasv: bool, close_data: bool) {
        self.state = state;

        if close_pasv {
            self.pasv = None;
        }
        if close_data {
            self.close_data();
        }

        if state == SessionState::Command {
            self.restart_position = 0;
            self.file_position = 0;
            self.file_size = 0;
            self.file = None;
            self.dir = None;
            self.active = None;
            self.data_on_control = false;
        }
    }

    /// Gracefully close the data connection: finish our side with a write
    /// shutdown, then let the descriptor close.
    fn close_data(&mut self) {
        if let Some(data) = self.data.take() {
            let _ = data.shutdown(Shutdown::Write);
        }
    }

    /// Control-fatal exit: release every socket so the server reaps this
    /// session on its next pass.
    fn teardown(&mut self) {
        self.close_data();
        self.pasv = None;
        self.ctrl = None;
    }
}

/// Find one complete command line in `buffer`.
///
/// Lines end with `\r\n` or a bare `\n`. Returns the line text (without
/// the terminator) and the number of bytes to consume, or None when no
/// complete line is present yet.
fn extract_line(buffer: &[u8]) -> Option<(String, usize)> {
    let newline = buffer.iter().position(|&b| b == b'\n')?;

    let mut end = newline;
    if end > 0 && buffer[end - 1] == b'\r' {
        end -= 1;
    }

    let line = String::from_utf8_lossy(&buffer[..end]).into_owned();
    Some((line, newline + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_line_crlf() {
        let (line, consumed) = extract_line(b"USER anonymous\r\nPASS\r\n").unwrap();
        assert_eq!(line, "USER anonymous");
        assert_eq!(consumed, 16);
    }

    #[test]
    fn test_extract_line_bare_lf() {
        let (line, consumed) = extract_line(b"NOOP\nrest").unwrap();
        assert_eq!(line, "NOOP");
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_extract_line_incomplete() {
        assert!(extract_line(b"").is_none());
        assert!(extract_line(b"USER half").is_none());
    }

    #[test]
    fn test_extract_line_empty_line() {
        let (line, consumed) = extract_line(b"\r\n").unwrap();
        assert_eq!(line, "");
        assert_eq!(consumed, 2);
    }
}
