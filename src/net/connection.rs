//! Module `connection`
//!
//! Non-blocking TCP connection wrapper owning one OS socket. Every
//! operation is a thin shim over the socket call plus logging: genuine
//! failures are logged with the operation name and OS error text, while
//! would-block conditions stay quiet and are surfaced to the caller as
//! `ErrorKind::WouldBlock`.

use log::{error, info};
use socket2::{Domain, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crate::buffer::IoBuffer;
use crate::error::is_would_block;

/// One owned stream socket plus its cached local and peer addresses.
///
/// A connection is never copied; a session either owns it outright or it
/// does not exist. Dropping the connection closes the descriptor
/// unconditionally.
pub struct Connection {
    socket: Socket,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    listening: bool,
    connected: bool,
}

impl Connection {
    /// Create a new IPv4 stream socket.
    pub fn create() -> io::Result<Connection> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(|e| {
            error!("socket: {}", e);
            e
        })?;

        Ok(Connection {
            socket,
            local: None,
            peer: None,
            listening: false,
            connected: false,
        })
    }

    /// Accept one pending connection, capturing the peer address.
    ///
    /// Would-block is not logged; any other failure is.
    pub fn accept(&self) -> io::Result<Connection> {
        let (socket, peer) = self.socket.accept().map_err(|e| {
            if !is_would_block(&e) {
                error!("accept: {}", e);
            }
            e
        })?;

        let peer = peer.as_socket();
        // getsockname on the accepted descriptor yields the concrete local
        // address even when the listener was bound to a wildcard
        let local = socket.local_addr().ok().and_then(|a| a.as_socket());

        if let Some(peer) = peer {
            info!("Accepted connection from {}", peer);
        }

        Ok(Connection {
            socket,
            local,
            peer,
            listening: false,
            connected: true,
        })
    }

    pub fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        if let Err(e) = self.socket.bind(&SockAddr::from(addr)) {
            error!("bind {}: {}", addr, e);
            return Err(e);
        }

        if addr.port() == 0 {
            // ephemeral port requested; ask the kernel what it picked
            self.local = self.socket.local_addr().ok().and_then(|a| a.as_socket());
        } else {
            self.local = Some(addr);
        }

        Ok(())
    }

    pub fn listen(&mut self, backlog: i32) -> io::Result<()> {
        if let Err(e) = self.socket.listen(backlog) {
            error!("listen: {}", e);
            return Err(e);
        }

        self.listening = true;
        Ok(())
    }

    /// Start a connect to `addr`.
    ///
    /// Returns `Ok(true)` when the connection completed immediately and
    /// `Ok(false)` when it is in progress on a non-blocking socket; the
    /// caller must poll for writability to observe completion.
    pub fn connect(&mut self, addr: SocketAddr) -> io::Result<bool> {
        match self.socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {
                self.peer = Some(addr);
                self.connected = true;
                info!("Connected to {}", addr);
                Ok(true)
            }
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                self.peer = Some(addr);
                self.connected = true;
                info!("Connecting to {}", addr);
                Ok(false)
            }
            Err(e) => {
                error!("connect {}: {}", addr, e);
                Err(e)
            }
        }
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        if let Err(e) = self.socket.shutdown(how) {
            info!("shutdown: {}", e);
            return Err(e);
        }

        Ok(())
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking).map_err(|e| {
            error!("set_nonblocking({}): {}", nonblocking, e);
            e
        })
    }

    pub fn set_reuse_address(&self, reuse: bool) -> io::Result<()> {
        self.socket.set_reuse_address(reuse).map_err(|e| {
            error!("setsockopt(SO_REUSEADDR, {}): {}", reuse, e);
            e
        })
    }

    pub fn set_linger(&self, linger: Option<Duration>) -> io::Result<()> {
        self.socket.set_linger(linger).map_err(|e| {
            error!("setsockopt(SO_LINGER): {}", e);
            e
        })
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        self.socket.set_recv_buffer_size(size).map_err(|e| {
            error!("setsockopt(SO_RCVBUF, {}): {}", size, e);
            e
        })
    }

    pub fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        self.socket.set_send_buffer_size(size).map_err(|e| {
            error!("setsockopt(SO_SNDBUF, {}): {}", size, e);
            e
        })
    }

    /// Read bytes into `buf`. `Ok(0)` means the peer closed the
    /// connection; would-block is returned unlogged.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.socket).read(buf).map_err(|e| {
            if !is_would_block(&e) {
                error!("recv: {}", e);
            }
            e
        })
    }

    /// Write bytes from `buf`. May be partial.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.socket).write(buf).map_err(|e| {
            if !is_would_block(&e) {
                error!("send: {}", e);
            }
            e
        })
    }

    /// Read into the buffer's free area, advancing its used area by the
    /// amount actually read.
    pub fn read_buffer(&self, buffer: &mut IoBuffer) -> io::Result<usize> {
        let rc = self.recv(buffer.free_area())?;
        buffer.mark_used(rc);
        Ok(rc)
    }

    /// Write from the buffer's used area, consuming the amount actually
    /// written.
    pub fn write_buffer(&self, buffer: &mut IoBuffer) -> io::Result<usize> {
        let rc = self.send(buffer.used_area())?;
        buffer.mark_free(rc);
        Ok(rc)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.listening {
            if let Some(local) = self.local {
                info!("Stop listening on {}", local);
            }
        }

        if self.connected {
            if let Some(peer) = self.peer {
                info!("Closing connection to {}", peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::poll::{self, POLLIN, POLLOUT, PollEntry};
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn test_bind_captures_ephemeral_port() {
        let mut conn = Connection::create().unwrap();
        conn.bind(loopback()).unwrap();
        let local = conn.local_addr().unwrap();
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn test_accept_and_buffer_io() {
        let mut listener = Connection::create().unwrap();
        listener.bind(loopback()).unwrap();
        listener.listen(1).unwrap();

        let mut client = Connection::create().unwrap();
        client.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = client.connect(addr);

        let accepted = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        // wait for connect completion, then push some bytes through
        let mut entries = [PollEntry::new(client.fd(), POLLOUT)];
        poll::poll(&mut entries, Duration::from_secs(5)).unwrap();
        assert!(entries[0].writable());

        let mut out = IoBuffer::new(64);
        out.free_area()[..5].copy_from_slice(b"hello");
        out.mark_used(5);
        let sent = client.write_buffer(&mut out).unwrap();
        assert_eq!(sent, 5);
        assert!(out.is_empty());

        let mut entries = [PollEntry::new(accepted.fd(), POLLIN)];
        poll::poll(&mut entries, Duration::from_secs(5)).unwrap();
        assert!(entries[0].readable());

        let mut input = IoBuffer::new(64);
        let received = accepted.read_buffer(&mut input).unwrap();
        assert_eq!(received, 5);
        assert_eq!(input.used_area(), b"hello");
    }

    #[test]
    fn test_recv_would_block_is_not_fatal() {
        let mut listener = Connection::create().unwrap();
        listener.bind(loopback()).unwrap();
        listener.listen(1).unwrap();

        let mut client = Connection::create().unwrap();
        let _ = client.connect(listener.local_addr().unwrap());
        let accepted = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 16];
        let err = accepted.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
