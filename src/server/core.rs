//! Module `core`
//!
//! The accept-dispatch-reap loop. A single thread drives every session;
//! the batched readiness poll is the only place the engine blocks.

use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Credentials;
use crate::config::ServerConfig;
use crate::error::{ServerError, is_would_block};
use crate::net::Connection;
use crate::net::poll::{self, POLLIN, PollEntry};
use crate::session::{Channel, Session};

/// What a poll entry belongs to: the listener, or one channel of one
/// session.
#[derive(Debug, Clone, Copy)]
enum Token {
    Listener,
    Session { index: usize, channel: Channel },
}

pub struct Server {
    listener: Connection,
    sessions: Vec<Session>,
    config: Arc<ServerConfig>,
    credentials: Credentials,
}

impl Server {
    /// Bind the control listener and prepare an empty session pool.
    ///
    /// Every failure here is listener-fatal: the server does not start.
    pub fn create(config: ServerConfig) -> Result<Server, ServerError> {
        let addr: SocketAddr = config
            .control_socket()
            .parse()
            .map_err(|_| ServerError::InvalidBindAddress(config.control_socket()))?;

        let mut listener = Connection::create().map_err(ServerError::CreateSocket)?;

        if addr.port() != 0 {
            listener
                .set_reuse_address(true)
                .map_err(ServerError::Configure)?;
        }

        listener
            .bind(addr)
            .map_err(|e| ServerError::Bind(addr, e))?;
        listener
            .listen(config.listen_backlog)
            .map_err(ServerError::Listen)?;
        listener
            .set_nonblocking(true)
            .map_err(ServerError::Configure)?;

        if let Some(local) = listener.local_addr() {
            info!("Started server at {}", local);
        }

        let credentials = Credentials::from_config(&config);

        Ok(Server {
            listener,
            sessions: Vec::new(),
            config: Arc::new(config),
            credentials,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// One loop iteration: poll every descriptor once, accept, dispatch,
    /// and reap terminated sessions. This is the hook an embedding host
    /// calls from its own loop.
    pub fn service(&mut self, timeout: Duration) {
        let mut entries = Vec::with_capacity(1 + 2 * self.sessions.len());
        let mut tokens = Vec::with_capacity(entries.capacity());

        entries.push(PollEntry::new(self.listener.fd(), POLLIN));
        tokens.push(Token::Listener);

        for (index, session) in self.sessions.iter().enumerate() {
            for (channel, fd, events) in session.poll_wants() {
                entries.push(PollEntry::new(fd, events));
                tokens.push(Token::Session { index, channel });
            }
        }

        match poll::poll(&mut entries, timeout) {
            Err(e) => {
                error!("Server poll failed: {}", e);
                return;
            }
            Ok(0) => {}
            Ok(_) => {
                for (entry, token) in entries.iter().zip(&tokens) {
                    if entry.revents == 0 {
                        continue;
                    }

                    match *token {
                        Token::Listener => self.accept_session(),
                        Token::Session { index, channel } => {
                            self.sessions[index].advance(channel, *entry);
                        }
                    }
                }
            }
        }

        self.sessions.retain(|session| {
            if session.dead() {
                info!("Session for {} closed", session.peer());
                return false;
            }
            true
        });
    }

    /// Run the service loop forever.
    pub fn run(&mut self) {
        let timeout = self.config.poll_timeout();
        loop {
            self.service(timeout);
        }
    }

    fn accept_session(&mut self) {
        match self.listener.accept() {
            Ok(ctrl) => {
                let session =
                    Session::create(ctrl, Arc::clone(&self.config), self.credentials.clone());
                self.sessions.push(session);
            }
            Err(e) => {
                // transient accept failures leave the server running
                if !is_would_block(&e) {
                    error!("Failed to accept control connection: {}", e);
                }
            }
        }
    }
}
