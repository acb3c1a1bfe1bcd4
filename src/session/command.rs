//! Command dispatch
//!
//! One handler per FTP verb, driven by `dispatch` whenever a complete
//! command line has been read from the control connection.

use log::{debug, error, info};
use std::fs;
use std::net::{IpAddr, SocketAddr};

use super::transfer::FileMode;
use super::{ListFormat, Session, SessionState};
use crate::auth;
use crate::net::addr;
use crate::protocol::commands::Command;
use crate::protocol::parse_command;
use crate::protocol::responses;
use crate::storage::{filesystem, validation};

impl Session {
    /// Dispatch one trimmed command line to its handler.
    pub(super) fn dispatch(&mut self, line: &str) {
        debug!("{} --> {}", self.peer, line);

        let command = parse_command(line);

        // during a data phase only transfer-control commands are honored;
        // anything else is rejected without touching the transfer
        if self.state != SessionState::Command {
            match command {
                Command::Abor => self.handle_abor(),
                Command::Stat(arg) => self.handle_stat(&arg),
                Command::Quit => self.handle_quit(),
                _ => self.send_reply(responses::BAD_SEQUENCE, "Another transfer is in progress"),
            }
            return;
        }

        // a remembered rename source survives only into an immediate RNTO
        if !matches!(command, Command::Rnto(_)) {
            self.rename_from = None;
        }

        if !self.logged_in
            && !matches!(
                command,
                Command::User(_) | Command::Pass(_) | Command::Quit
            )
        {
            self.send_reply(responses::NOT_LOGGED_IN, "Not logged in");
            return;
        }

        match command {
            Command::Abor => self.handle_abor(),
            Command::Allo => self.handle_allo(),
            Command::Appe(arg) => self.xfer_file(&arg, FileMode::Append),
            Command::Cdup => self.handle_cdup(),
            Command::Cwd(arg) => self.handle_cwd(&arg),
            Command::Dele(arg) => self.handle_dele(&arg),
            Command::Feat => self.handle_feat(),
            Command::Help => self.handle_help(),
            Command::List(arg) => self.xfer_dir(&arg, ListFormat::Long, true),
            Command::Mdtm(arg) => self.handle_mdtm(&arg),
            Command::Mkd(arg) => self.handle_mkd(&arg),
            Command::Mode(arg) => self.handle_mode(&arg),
            Command::Nlst(arg) => self.xfer_dir(&arg, ListFormat::Names, false),
            Command::Noop => self.handle_noop(),
            Command::Pass(arg) => self.handle_pass(&arg),
            Command::Pasv => self.handle_pasv(),
            Command::Port(arg) => self.handle_port(&arg),
            Command::Pwd => self.handle_pwd(),
            Command::Quit => self.handle_quit(),
            Command::Rest(arg) => self.handle_rest(&arg),
            Command::Retr(arg) => self.xfer_file(&arg, FileMode::Retrieve),
            Command::Rmd(arg) => self.handle_rmd(&arg),
            Command::Rnfr(arg) => self.handle_rnfr(&arg),
            Command::Rnto(arg) => self.handle_rnto(&arg),
            Command::Size(arg) => self.handle_size(&arg),
            Command::Stat(arg) => self.handle_stat(&arg),
            Command::Stor(arg) => self.xfer_file(&arg, FileMode::Store),
            Command::Stou => self.handle_stou(),
            Command::Stru(arg) => self.handle_stru(&arg),
            Command::Syst => self.handle_syst(),
            Command::Type(arg) => self.handle_type(&arg),
            Command::User(arg) => self.handle_user(&arg),
            Command::Unknown(_) => self.handle_unknown(),
        }
    }

    /// Resolve a path argument against the working directory, replying on
    /// failure with `reject_code`.
    fn resolve_arg(&mut self, arg: &str, reject_code: u16) -> Option<String> {
        match validation::resolve_against(&self.cwd, arg) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("{} rejected path {:?}: {}", self.peer, arg, e);
                self.send_reply(reject_code, "Invalid path");
                None
            }
        }
    }

    fn real_path(&self, virtual_path: &str) -> std::path::PathBuf {
        validation::to_real(&self.config.server_root_path(), virtual_path)
    }

    // --- login ---

    fn handle_user(&mut self, username: &str) {
        self.set_state(SessionState::Command, false, false);
        self.logged_in = false;

        match auth::validate_user(&self.credentials, username) {
            Ok(()) => {
                self.user_ok = true;
                self.username = Some(username.to_string());
                self.send_reply(
                    responses::PASSWORD_REQUIRED,
                    &format!("Password required for {}", username),
                );
            }
            Err(e) => {
                self.user_ok = false;
                self.username = None;
                self.send_reply(responses::NOT_LOGGED_IN, e.message());
            }
        }
    }

    fn handle_pass(&mut self, password: &str) {
        self.set_state(SessionState::Command, false, false);

        if !self.user_ok {
            self.send_reply(responses::BAD_SEQUENCE, "Login with USER first");
            return;
        }

        let username = self.username.clone().unwrap_or_default();
        match auth::validate_password(&self.credentials, &username, password) {
            Ok(()) => {
                self.logged_in = true;
                info!("{} logged in as {}", self.peer, username);
                self.send_reply(responses::LOGIN_SUCCESS, "Login successful");
            }
            Err(e) => {
                self.logged_in = false;
                self.user_ok = false;
                self.username = None;
                self.send_reply(responses::NOT_LOGGED_IN, e.message());
            }
        }
    }

    // --- connection-scoped ---

    fn handle_quit(&mut self) {
        self.send_reply(responses::CLOSING, "Goodbye");
        self.closing = true;

        // if the reply flushed immediately there is nothing left to wait on
        if self.ctrl.is_some() && self.response_buffer.is_empty() {
            self.teardown();
        }
    }

    fn handle_abor(&mut self) {
        if self.state == SessionState::Command {
            self.send_reply(responses::NO_TRANSFER, "No transfer to abort");
            return;
        }

        self.send_reply(responses::TRANSFER_ABORTED, "Transfer aborted");
        self.send_reply(responses::TRANSFER_COMPLETE, "Abort successful");
        self.set_state(SessionState::Command, true, true);
    }

    fn handle_syst(&mut self) {
        self.set_state(SessionState::Command, false, false);
        self.send_reply(responses::SYSTEM_TYPE, "UNIX Type: L8");
    }

    fn handle_feat(&mut self) {
        self.set_state(SessionState::Command, false, false);
        self.send_raw(
            "211-Extensions supported\r\n\
             \x20MDTM\r\n\
             \x20PASV\r\n\
             \x20REST STREAM\r\n\
             \x20SIZE\r\n\
             \x20TVFS\r\n\
             \x20UTF8\r\n\
             211 End\r\n",
        );
    }

    fn handle_help(&mut self) {
        self.set_state(SessionState::Command, false, false);
        self.send_raw(
            "214-The following commands are recognized\r\n\
             \x20ABOR ALLO APPE CDUP CWD DELE FEAT HELP LIST MDTM MKD MODE NLST NOOP\r\n\
             \x20PASS PASV PORT PWD QUIT REST RETR RMD RNFR RNTO SIZE STAT STOR STOU\r\n\
             \x20STRU SYST TYPE USER XCUP XCWD XMKD XPWD XRMD\r\n\
             214 End\r\n",
        );
    }

    fn handle_noop(&mut self) {
        self.send_reply(responses::OK, "OK");
    }

    fn handle_allo(&mut self) {
        self.send_reply(responses::SUPERFLUOUS, "Superfluous command");
        self.set_state(SessionState::Command, false, false);
    }

    fn handle_type(&mut self, _arg: &str) {
        // transfers are always binary
        self.set_state(SessionState::Command, false, false);
        self.send_reply(responses::OK, "OK");
    }

    fn handle_mode(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        // only stream mode is supported
        if arg.eq_ignore_ascii_case("S") {
            self.send_reply(responses::OK, "OK");
        } else {
            self.send_reply(responses::PARAM_UNSUPPORTED, "Unavailable");
        }
    }

    fn handle_stru(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        // only file structure is supported
        if arg.eq_ignore_ascii_case("F") {
            self.send_reply(responses::OK, "OK");
        } else {
            self.send_reply(responses::PARAM_UNSUPPORTED, "Unavailable");
        }
    }

    fn handle_stou(&mut self) {
        self.set_state(SessionState::Command, false, false);
        self.send_reply(responses::NOT_IMPLEMENTED, "Command not implemented");
    }

    fn handle_unknown(&mut self) {
        self.send_reply(responses::NOT_IMPLEMENTED, "Command not implemented");
    }

    fn handle_stat(&mut self, arg: &str) {
        match self.state {
            SessionState::DataConnect => {
                self.send_raw(
                    "211-FTP server status\r\n Waiting for data connection\r\n211 End\r\n",
                );
            }
            SessionState::DataTransfer => {
                let progress = if self.file_size != 0 {
                    format!(
                        " Transferred {} of {} bytes\r\n",
                        self.file_position, self.file_size
                    )
                } else {
                    format!(" Transferred {} bytes\r\n", self.file_position)
                };
                self.send_raw(&format!(
                    "211-FTP server status\r\n{}211 End\r\n",
                    progress
                ));
            }
            SessionState::Command => {
                if arg.is_empty() {
                    self.send_raw("211-FTP server status\r\n Ready\r\n211 End\r\n");
                } else {
                    self.xfer_dir(arg, ListFormat::Status, false);
                }
            }
        }
    }

    // --- navigation ---

    fn handle_pwd(&mut self) {
        self.set_state(SessionState::Command, false, false);

        // embedded quotes are doubled per the 257 reply convention
        let quoted = self.cwd.replace('"', "\"\"");
        self.send_raw(&format!("257 \"{}\"\r\n", quoted));
    }

    fn handle_cwd(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing directory path");
            return;
        }

        self.change_dir(arg);
    }

    fn handle_cdup(&mut self) {
        self.set_state(SessionState::Command, false, false);
        self.change_dir("..");
    }

    fn change_dir(&mut self, arg: &str) {
        let Some(virtual_path) = self.resolve_arg(arg, responses::FILE_UNAVAILABLE) else {
            return;
        };

        let real = self.real_path(&virtual_path);
        match fs::metadata(&real) {
            Ok(meta) if meta.is_dir() => {
                info!("{} changed directory to {}", self.peer, virtual_path);
                self.cwd = virtual_path;
                self.send_reply(responses::FILE_ACTION_OK, "Directory changed");
            }
            Ok(_) => self.send_reply(responses::FILE_UNAVAILABLE, "Not a directory"),
            Err(_) => self.send_reply(responses::FILE_UNAVAILABLE, "Directory not found"),
        }
    }

    // --- path mutation ---

    fn handle_dele(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing file name");
            return;
        }

        let Some(virtual_path) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        match fs::remove_file(self.real_path(&virtual_path)) {
            Ok(()) => {
                info!("{} deleted {}", self.peer, virtual_path);
                self.send_reply(responses::FILE_ACTION_OK, "File deleted");
            }
            Err(e) => {
                error!("{} failed to delete {}: {}", self.peer, virtual_path, e);
                self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
            }
        }
    }

    fn handle_mkd(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing directory name");
            return;
        }

        let Some(virtual_path) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        match fs::create_dir(self.real_path(&virtual_path)) {
            Ok(()) => {
                info!("{} created directory {}", self.peer, virtual_path);
                let quoted = virtual_path.replace('"', "\"\"");
                self.send_raw(&format!("257 \"{}\" created\r\n", quoted));
            }
            Err(e) => {
                error!("{} failed to create {}: {}", self.peer, virtual_path, e);
                self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
            }
        }
    }

    fn handle_rmd(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing directory name");
            return;
        }

        let Some(virtual_path) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        match fs::remove_dir(self.real_path(&virtual_path)) {
            Ok(()) => {
                info!("{} removed directory {}", self.peer, virtual_path);
                self.send_reply(responses::FILE_ACTION_OK, "Directory removed");
            }
            Err(e) => {
                error!("{} failed to remove {}: {}", self.peer, virtual_path, e);
                self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
            }
        }
    }

    fn handle_rnfr(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing source path");
            return;
        }

        let Some(virtual_path) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        // the source must exist before RNTO is offered
        if fs::symlink_metadata(self.real_path(&virtual_path)).is_err() {
            self.send_reply(responses::ACTION_NOT_TAKEN, "No such file or directory");
            return;
        }

        self.rename_from = Some(virtual_path);
        self.send_reply(responses::PENDING_INFO, "Ready for RNTO");
    }

    fn handle_rnto(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        let Some(source) = self.rename_from.take() else {
            self.send_reply(responses::BAD_SEQUENCE, "Bad sequence of commands");
            return;
        };

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing target path");
            return;
        }

        let Some(target) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        match fs::rename(self.real_path(&source), self.real_path(&target)) {
            Ok(()) => {
                info!("{} renamed {} to {}", self.peer, source, target);
                self.send_reply(responses::FILE_ACTION_OK, "Rename successful");
            }
            Err(e) => {
                error!("{} failed to rename {}: {}", self.peer, source, e);
                self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string());
            }
        }
    }

    // --- metadata ---

    fn handle_size(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing file name");
            return;
        }

        let Some(virtual_path) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        match filesystem::file_size(&self.real_path(&virtual_path)) {
            Ok(size) => self.send_reply(responses::FILE_STATUS, &size.to_string()),
            Err(e) => self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string()),
        }
    }

    fn handle_mdtm(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() {
            self.send_reply(responses::SYNTAX_ERROR, "Missing file name");
            return;
        }

        let Some(virtual_path) = self.resolve_arg(arg, responses::NAME_NOT_ALLOWED) else {
            return;
        };

        match filesystem::modify_stamp(&self.real_path(&virtual_path)) {
            Ok(stamp) => self.send_reply(responses::FILE_STATUS, &stamp),
            Err(e) => self.send_reply(responses::FILE_UNAVAILABLE, &e.to_string()),
        }
    }

    // --- transfer setup ---

    fn handle_rest(&mut self, arg: &str) {
        self.set_state(SessionState::Command, false, false);

        if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
            self.send_reply(responses::SYNTAX_ERROR, "Invalid restart offset");
            return;
        }

        let Ok(position) = arg.parse::<u64>() else {
            self.send_reply(responses::SYNTAX_ERROR, "Invalid restart offset");
            return;
        };

        self.restart_position = position;
        self.send_reply(
            responses::PENDING_INFO,
            &format!("Restarting at {}", position),
        );
    }

    fn handle_pasv(&mut self) {
        self.set_state(SessionState::Command, true, true);
        self.pasv_pending = false;
        self.port_pending = false;
        self.port_addr = None;

        let Some(ctrl_local) = self.ctrl.as_ref().and_then(|c| c.local_addr()) else {
            self.send_reply(responses::LOCAL_ERROR, "Failed to determine local address");
            return;
        };

        let IpAddr::V4(ip) = ctrl_local.ip() else {
            self.send_reply(responses::LOCAL_ERROR, "Passive mode requires IPv4");
            return;
        };

        let mut listener = match crate::net::Connection::create() {
            Ok(listener) => listener,
            Err(_) => {
                self.send_reply(responses::LOCAL_ERROR, "Failed to create listening socket");
                return;
            }
        };

        let _ = listener.set_recv_buffer_size(self.config.sock_buffer_size);
        let _ = listener.set_send_buffer_size(self.config.sock_buffer_size);

        if listener.set_nonblocking(true).is_err()
            || listener
                .bind(SocketAddr::new(IpAddr::V4(ip), 0))
                .is_err()
            || listener.listen(1).is_err()
        {
            self.send_reply(responses::LOCAL_ERROR, "Failed to bind address");
            return;
        }

        let Some(SocketAddr::V4(local)) = listener.local_addr() else {
            self.send_reply(responses::LOCAL_ERROR, "Failed to bind address");
            return;
        };

        info!("{} passive listener on {}", self.peer, local);

        self.pasv = Some(listener);
        self.pasv_pending = true;
        self.send_reply(
            responses::ENTERING_PASSIVE,
            &format!("Entering Passive Mode ({})", addr::format_pasv(&local)),
        );
    }

    fn handle_port(&mut self, arg: &str) {
        self.set_state(SessionState::Command, true, true);
        self.pasv_pending = false;
        self.port_pending = false;
        self.port_addr = None;

        let Some(target) = addr::parse_port_target(arg) else {
            self.send_reply(responses::SYNTAX_ERROR, "Invalid PORT argument");
            return;
        };

        // the data target must belong to the control peer
        if self.peer.ip() != IpAddr::V4(*target.ip()) {
            self.send_reply(
                responses::SYNTAX_ERROR,
                "PORT address must match control connection",
            );
            return;
        }

        if target.port() < 1024 {
            self.send_reply(responses::SYNTAX_ERROR, "Port must be 1024 or above");
            return;
        }

        self.port_addr = Some(SocketAddr::V4(target));
        self.port_pending = true;
        self.send_reply(responses::OK, "PORT command successful");
    }
}
