//! Readiness polling
//!
//! Thin wrapper over `poll(2)`: one call reports readiness for every
//! descriptor the server cares about. This is the only blocking point in
//! the entire engine; every socket itself is non-blocking.

use log::error;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub const POLLIN: i16 = libc::POLLIN;
pub const POLLOUT: i16 = libc::POLLOUT;
pub const POLLERR: i16 = libc::POLLERR;
pub const POLLHUP: i16 = libc::POLLHUP;
pub const POLLNVAL: i16 = libc::POLLNVAL;

/// One descriptor in a poll set: requested events in, observed events out.
#[derive(Debug, Clone, Copy)]
pub struct PollEntry {
    pub fd: RawFd,
    pub events: i16,
    pub revents: i16,
}

impl PollEntry {
    pub fn new(fd: RawFd, events: i16) -> Self {
        Self {
            fd,
            events,
            revents: 0,
        }
    }

    pub fn readable(&self) -> bool {
        self.revents & POLLIN != 0
    }

    pub fn writable(&self) -> bool {
        self.revents & POLLOUT != 0
    }

    pub fn failed(&self) -> bool {
        self.revents & (POLLERR | POLLHUP | POLLNVAL) != 0
    }
}

/// Poll all entries at once, blocking up to `timeout`.
///
/// Fills `revents` on every entry and returns the number of ready
/// descriptors. An empty set returns immediately.
pub fn poll(entries: &mut [PollEntry], timeout: Duration) -> io::Result<usize> {
    if entries.is_empty() {
        return Ok(0);
    }

    let mut fds: Vec<libc::pollfd> = entries
        .iter()
        .map(|entry| libc::pollfd {
            fd: entry.fd,
            events: entry.events,
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let e = io::Error::last_os_error();
        error!("poll: {}", e);
        return Err(e);
    }

    for (entry, fd) in entries.iter_mut().zip(&fds) {
        entry.revents = fd.revents;
    }

    Ok(rc as usize)
}
