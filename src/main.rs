//! Rill FTP Server - Entry Point
//!
//! A single-threaded, poll-driven FTP server implementing the core of
//! RFC 959 over non-blocking sockets.

use log::{error, info};

use rill_ftp_server::{Server, ServerConfig};

fn main() {
    // env_logger picks up the RUST_LOG environment variable
    env_logger::init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Launching FTP server on {}", config.control_socket());

    let mut server = match Server::create(config) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    server.run();
}
