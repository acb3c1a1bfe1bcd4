//! Data-phase plumbing
//!
//! Transfer setup for RETR/STOR/APPE and the listing commands, passive
//! accept and active connect handling, and the pump loops that move bytes
//! between the data connection and the file or listing source one
//! buffer-load at a time.

use log::{error, info};
use std::fs;
use std::io::{Read, Write};

use super::{ListFormat, Session, SessionState, Transfer};
use crate::error::is_would_block;
use crate::net::Connection;
use crate::protocol::responses;
use crate::storage::{filesystem, validation};

/// File-transfer flavor requested by the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FileMode {
    Retrieve,
    Store,
    Append,
}

impl Session {
    /// Set up a RETR/STOR/APPE transfer: open the file, consume the
    /// one-shot restart offset, and enter the data-connect phase.
    pub(super) fn xfer_file(&mut self, arg: &str, mode: FileMode) {
        self.xfer_buffer.clear();

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing file name");
            return;
        }

        let virtual_path = match validation::resolve_against(&self.cwd, arg) {
            Ok(path) => path,
            Err(e) => {
                error!("{} rejected path {:?}: {}", self.peer, arg, e);
                self.send_reply(responses::NAME_NOT_ALLOWED, "Invalid file path");
                self.set_state(SessionState::Command, true, true);
                return;
            }
        };

        let real = validation::to_real(&self.config.server_root_path(), &virtual_path);
        let restart = std::mem::take(&mut self.restart_position);

        match mode {
            FileMode::Retrieve => match filesystem::open_retrieve(&real, restart) {
                Ok((file, size)) => {
                    self.file = Some(file);
                    self.file_size = size;
                    self.file_position = restart;
                }
                Err(e) => {
                    self.send_reply(responses::ACTION_NOT_TAKEN, &e.to_string());
                    return;
                }
            },
            FileMode::Store | FileMode::Append => {
                match filesystem::open_store(&real, restart, mode == FileMode::Append) {
                    Ok(file) => {
                        self.file = Some(file);
                        self.file_position = restart;
                    }
                    Err(e) => {
                        self.send_reply(responses::ACTION_NOT_TAKEN, &e.to_string());
                        return;
                    }
                }
            }
        }

        if !self.port_pending && !self.pasv_pending {
            self.send_reply(responses::BAD_SEQUENCE, "Use PORT or PASV first");
            self.set_state(SessionState::Command, true, true);
            return;
        }

        info!("{} transferring {}", self.peer, virtual_path);

        self.active = Some(if mode == FileMode::Retrieve {
            Transfer::Retrieve
        } else {
            Transfer::Store
        });
        self.set_state(SessionState::DataConnect, false, true);

        if self.port_pending && !self.data_connect() {
            self.send_reply(responses::CANT_OPEN_DATA, "Can't open data connection");
            self.set_state(SessionState::Command, true, true);
        }
    }

    /// Set up a LIST/NLST/STAT listing over the given path (or the working
    /// directory) and enter the data-connect phase.
    pub(super) fn xfer_dir(&mut self, arg: &str, format: ListFormat, workaround: bool) {
        self.xfer_buffer.clear();
        self.active = Some(Transfer::List(format));

        if !arg.is_empty() {
            let virtual_path = match validation::resolve_against(&self.cwd, arg) {
                Ok(path) => path,
                Err(e) => {
                    error!("{} rejected path {:?}: {}", self.peer, arg, e);
                    self.send_reply(responses::FILE_UNAVAILABLE, "Invalid path");
                    self.set_state(SessionState::Command, true, true);
                    return;
                }
            };

            let real = validation::to_real(&self.config.server_root_path(), &virtual_path);
            let meta = match fs::metadata(&real) {
                Ok(meta) => meta,
                Err(e) => {
                    // work around clients that think LIST -a / -l is valid
                    if workaround && format == ListFormat::Long {
                        if let Some(rest) =
                            arg.strip_prefix("-a").or_else(|| arg.strip_prefix("-l"))
                        {
                            if rest.is_empty() || rest.starts_with(' ') {
                                self.xfer_dir(rest.trim_start(), format, false);
                                return;
                            }
                        }
                    }

                    self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
                    self.set_state(SessionState::Command, true, true);
                    return;
                }
            };

            if meta.is_dir() {
                match fs::read_dir(&real) {
                    Ok(dir) => {
                        self.dir = Some(dir);
                        self.lwd = virtual_path;
                    }
                    Err(e) => {
                        self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
                        self.set_state(SessionState::Command, true, true);
                        return;
                    }
                }
            } else {
                // a single file lists as its one entry
                let line = if format == ListFormat::Names {
                    virtual_path.clone()
                } else {
                    let name = virtual_path
                        .rsplit('/')
                        .next()
                        .unwrap_or(virtual_path.as_str());
                    filesystem::format_list_entry(&meta, name)
                };

                if !self.push_listing_line(&line, format) {
                    self.send_reply(responses::LOCAL_ERROR, "Listing entry too large");
                    self.set_state(SessionState::Command, true, true);
                    return;
                }

                self.dir = None;
            }
        } else {
            let real = validation::to_real(&self.config.server_root_path(), &self.cwd);
            match fs::read_dir(&real) {
                Ok(dir) => {
                    self.dir = Some(dir);
                    self.lwd = self.cwd.clone();
                }
                Err(e) => {
                    self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
                    self.set_state(SessionState::Command, true, true);
                    return;
                }
            }
        }

        if format == ListFormat::Status {
            // status listings stream over the control connection
            self.send_raw("213-Status\r\n");
            self.set_state(SessionState::DataTransfer, true, true);
            self.data_on_control = true;
            return;
        }

        if !self.port_pending && !self.pasv_pending {
            self.send_reply(responses::BAD_SEQUENCE, "Use PORT or PASV first");
            self.set_state(SessionState::Command, true, true);
            return;
        }

        self.set_state(SessionState::DataConnect, false, true);

        if self.port_pending && !self.data_connect() {
            self.send_reply(responses::CANT_OPEN_DATA, "Can't open data connection");
            self.set_state(SessionState::Command, true, true);
        }
    }

    /// Accept the passive peer. The listener accepts exactly once and is
    /// discarded as soon as a peer arrives.
    pub(super) fn data_accept(&mut self) -> bool {
        if !self.pasv_pending {
            self.send_reply(responses::BAD_SEQUENCE, "Bad sequence of commands");
            self.set_state(SessionState::Command, true, true);
            return false;
        }
        self.pasv_pending = false;

        let accepted = match self.pasv.as_ref() {
            Some(listener) => listener.accept(),
            None => {
                self.set_state(SessionState::Command, true, true);
                return false;
            }
        };
        self.pasv = None;

        let data = match accepted {
            Ok(conn) => conn,
            Err(_) => {
                self.send_reply(responses::CANT_OPEN_DATA, "Failed to establish connection");
                self.set_state(SessionState::Command, true, true);
                return false;
            }
        };

        let _ = data.set_recv_buffer_size(self.config.sock_buffer_size);
        let _ = data.set_send_buffer_size(self.config.sock_buffer_size);

        if data.set_nonblocking(true).is_err() {
            self.send_reply(responses::CANT_OPEN_DATA, "Failed to establish connection");
            self.set_state(SessionState::Command, true, true);
            return false;
        }

        self.data = Some(data);
        self.send_reply(responses::DATA_READY, "Ready");
        self.set_state(SessionState::DataTransfer, true, false);
        true
    }

    /// Start the active-mode connect to the PORT target. Completion is
    /// observed later as data-socket writability.
    pub(super) fn data_connect(&mut self) -> bool {
        self.port_pending = false;

        let Some(target) = self.port_addr else {
            return false;
        };

        let mut conn = match Connection::create() {
            Ok(conn) => conn,
            Err(_) => return false,
        };

        let _ = conn.set_recv_buffer_size(self.config.sock_buffer_size);
        let _ = conn.set_send_buffer_size(self.config.sock_buffer_size);

        if conn.set_nonblocking(true).is_err() {
            return false;
        }

        match conn.connect(target) {
            Ok(true) => {
                self.data = Some(conn);
                self.send_reply(responses::DATA_READY, "Ready");
                self.set_state(SessionState::DataTransfer, true, false);
                true
            }
            Ok(false) => {
                // in progress; poll reports writability when it completes
                self.data = Some(conn);
                true
            }
            Err(_) => false,
        }
    }

    /// Run one step of the active transfer. Returns whether another step
    /// should run immediately.
    pub(super) fn transfer_step(&mut self) -> bool {
        match self.active {
            Some(Transfer::List(format)) => self.list_transfer(format),
            Some(Transfer::Retrieve) => self.retrieve_transfer(),
            Some(Transfer::Store) => self.store_transfer(),
            None => false,
        }
    }

    fn retrieve_transfer(&mut self) -> bool {
        if self.xfer_buffer.is_empty() {
            self.xfer_buffer.clear();

            let rc = match self.file.as_mut() {
                Some(file) => file.read(self.xfer_buffer.free_area()),
                None => {
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
            };

            match rc {
                Err(e) => {
                    self.send_reply(responses::LOCAL_ERROR, &e.to_string());
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
                Ok(0) => {
                    // end of file and the buffer is drained
                    self.send_reply(responses::TRANSFER_COMPLETE, "Transfer complete");
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
                Ok(n) => self.xfer_buffer.mark_used(n),
            }
        }

        self.send_transfer_data()
    }

    fn store_transfer(&mut self) -> bool {
        if self.xfer_buffer.is_empty() {
            self.xfer_buffer.clear();

            let rc = match self.data.as_ref() {
                Some(data) => data.read_buffer(&mut self.xfer_buffer),
                None => {
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
            };

            match rc {
                Err(e) if is_would_block(&e) => return false,
                Err(e) => {
                    self.send_reply(responses::LOCAL_ERROR, &e.to_string());
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
                Ok(0) => {
                    // peer finished sending and everything is on disk
                    self.send_reply(responses::TRANSFER_COMPLETE, "Transfer complete");
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
                Ok(_) => {}
            }
        }

        let rc = match self.file.as_mut() {
            Some(file) => file.write(self.xfer_buffer.used_area()),
            None => {
                self.set_state(SessionState::Command, true, true);
                return false;
            }
        };

        match rc {
            Err(e) => {
                self.send_reply(responses::TRANSFER_ABORTED, &e.to_string());
                self.set_state(SessionState::Command, true, true);
                false
            }
            Ok(0) => {
                self.send_reply(responses::TRANSFER_ABORTED, "Failed to write data");
                self.set_state(SessionState::Command, true, true);
                false
            }
            Ok(n) => {
                self.file_position += n as u64;
                self.xfer_buffer.mark_free(n);
                true
            }
        }
    }

    fn list_transfer(&mut self, format: ListFormat) -> bool {
        if self.xfer_buffer.is_empty() {
            self.xfer_buffer.clear();

            // no directory handle means a single-entry listing already sent
            let next = match self.dir.as_mut() {
                Some(dir) => dir.next(),
                None => return self.finish_listing(format),
            };

            match next {
                None => return self.finish_listing(format),
                Some(Err(e)) => {
                    self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
                    self.set_state(SessionState::Command, true, true);
                    return false;
                }
                Some(Ok(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();

                    let line = if format == ListFormat::Names {
                        validation::build_path(&self.lwd, &name)
                    } else {
                        match entry.metadata() {
                            Ok(meta) => filesystem::format_list_entry(&meta, &name),
                            Err(e) => {
                                self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
                                self.set_state(SessionState::Command, true, true);
                                return false;
                            }
                        }
                    };

                    if !self.push_listing_line(&line, format) {
                        self.send_reply(responses::LOCAL_ERROR, "Listing entry too large");
                        self.set_state(SessionState::Command, true, true);
                        return false;
                    }
                }
            }
        }

        self.send_transfer_data()
    }

    fn finish_listing(&mut self, format: ListFormat) -> bool {
        if format == ListFormat::Status {
            self.send_reply(responses::FILE_STATUS, "End of status");
        } else {
            self.send_reply(responses::TRANSFER_COMPLETE, "Directory send OK");
        }

        self.set_state(SessionState::Command, true, true);
        false
    }

    /// Append one listing line (with status-mode indent and line ending)
    /// to the transfer buffer. Fails when the line does not fit.
    fn push_listing_line(&mut self, line: &str, format: ListFormat) -> bool {
        let mut out = String::with_capacity(line.len() + 3);
        if format == ListFormat::Status {
            out.push(' ');
        }
        out.push_str(line);
        out.push_str("\r\n");

        if self.xfer_buffer.free_size() < out.len() {
            return false;
        }

        let len = out.len();
        self.xfer_buffer.free_area()[..len].copy_from_slice(out.as_bytes());
        self.xfer_buffer.mark_used(len);
        true
    }

    /// Push pending transfer bytes to the data sink (the data connection,
    /// or the control connection for status listings). Returns whether the
    /// pump should run again immediately.
    fn send_transfer_data(&mut self) -> bool {
        let conn = if self.data_on_control {
            self.ctrl.as_ref()
        } else {
            self.data.as_ref()
        };

        let Some(conn) = conn else {
            self.set_state(SessionState::Command, true, true);
            return false;
        };

        match conn.write_buffer(&mut self.xfer_buffer) {
            Err(e) if is_would_block(&e) => false,
            Err(_) | Ok(0) => {
                self.send_reply(responses::TRANSFER_ABORTED, "Connection broken during transfer");
                self.set_state(SessionState::Command, true, true);
                false
            }
            Ok(n) => {
                self.file_position += n as u64;
                true
            }
        }
    }
}
