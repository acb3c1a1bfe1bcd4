//! End-to-end tests driving a real server instance over TCP.
//!
//! Each test starts its own server on an ephemeral port with a scratch
//! served root, runs the engine loop on a background thread, and speaks
//! the wire protocol through plain blocking sockets.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use rill_ftp_server::{Server, ServerConfig};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    root: TempDir,
}

fn start_server_with(mut config: ServerConfig) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    config.bind_address = "127.0.0.1".to_string();
    config.control_port = 0;
    config.server_root = root.path().to_string_lossy().into_owned();

    let mut server = Server::create(config).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run());

    TestServer { addr, root }
}

fn start_server() -> TestServer {
    start_server_with(ServerConfig::default())
}

struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();

        let mut client = Client {
            reader: BufReader::new(stream),
        };

        let greeting = client.read_reply();
        assert!(greeting.starts_with("220"), "greeting: {}", greeting);
        client
    }

    fn send(&mut self, command: &str) {
        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{}\r\n", command).as_bytes())
            .unwrap();
        stream.flush().unwrap();
    }

    fn read_reply(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    /// Read reply lines until the terminating `<code> ` line of a
    /// multi-line reply.
    fn read_multiline(&mut self, code: &str) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_reply();
            let done = line.starts_with(code) && !line.starts_with(&format!("{}-", code));
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    fn command(&mut self, command: &str) -> String {
        self.send(command);
        self.read_reply()
    }

    fn login(&mut self) {
        let reply = self.command("USER anonymous");
        assert!(reply.starts_with("331"), "USER reply: {}", reply);
        let reply = self.command("PASS");
        assert!(reply.starts_with("230"), "PASS reply: {}", reply);
    }

    /// Enter passive mode and connect a data socket to the announced
    /// address.
    fn pasv_data(&mut self) -> TcpStream {
        let reply = self.command("PASV");
        assert!(reply.starts_with("227"), "PASV reply: {}", reply);

        let stream = TcpStream::connect(parse_pasv(&reply)).unwrap();
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        stream
    }
}

fn parse_pasv(reply: &str) -> SocketAddr {
    let start = reply.find('(').unwrap() + 1;
    let end = reply.find(')').unwrap();
    let fields: Vec<u16> = reply[start..end]
        .split(',')
        .map(|field| field.parse().unwrap())
        .collect();
    assert_eq!(fields.len(), 6, "PASV reply: {}", reply);

    let ip: IpAddr = format!("{}.{}.{}.{}", fields[0], fields[1], fields[2], fields[3])
        .parse()
        .unwrap();
    SocketAddr::new(ip, fields[4] * 256 + fields[5])
}

fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    data
}

#[test]
fn test_anonymous_login() {
    let server = start_server();
    let mut client = Client::connect(server.addr);

    assert!(client.command("USER anonymous").starts_with("331"));
    assert!(client.command("PASS").starts_with("230"));
}

#[test]
fn test_fixed_credentials() {
    let config = ServerConfig {
        username: Some("alice".to_string()),
        password: Some("secret".to_string()),
        anonymous: false,
        ..ServerConfig::default()
    };
    let server = start_server_with(config);
    let mut client = Client::connect(server.addr);

    // unknown user is rejected outright
    assert!(client.command("USER mallory").starts_with("530"));

    // wrong password resets the partial login
    assert!(client.command("USER alice").starts_with("331"));
    assert!(client.command("PASS wrong").starts_with("530"));
    assert!(client.command("PASS secret").starts_with("503"));

    // and the real thing works
    assert!(client.command("USER alice").starts_with("331"));
    assert!(client.command("PASS secret").starts_with("230"));
}

#[test]
fn test_commands_require_login() {
    let server = start_server();
    let mut client = Client::connect(server.addr);

    assert!(client.command("LIST").starts_with("530"));
    assert!(client.command("PWD").starts_with("530"));
    assert!(client.command("RETR x.txt").starts_with("530"));

    // QUIT is connection-scoped and always honored
    assert!(client.command("QUIT").starts_with("221"));
}

#[test]
fn test_pasv_list_round_trip() {
    let server = start_server();
    fs::write(server.root.path().join("alpha.txt"), b"alpha").unwrap();
    fs::write(server.root.path().join("beta.txt"), b"beta").unwrap();
    fs::create_dir(server.root.path().join("subdir")).unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    let mut data = client.pasv_data();
    assert!(client.command("LIST").starts_with("150"));

    let listing = String::from_utf8(read_to_end(&mut data)).unwrap();
    assert!(listing.contains("alpha.txt"), "listing: {}", listing);
    assert!(listing.contains("beta.txt"), "listing: {}", listing);
    assert!(listing.contains("subdir"), "listing: {}", listing);

    // detail lines carry a permission column
    let first = listing.lines().next().unwrap();
    assert!(first.starts_with('d') || first.starts_with('-'), "{}", first);

    assert!(client.read_reply().starts_with("226"));
}

#[test]
fn test_pasv_listener_accepts_once() {
    let server = start_server();
    fs::write(server.root.path().join("once.txt"), b"once").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    let reply = client.command("PASV");
    assert!(reply.starts_with("227"));
    let pasv_addr = parse_pasv(&reply);

    let mut data = TcpStream::connect(pasv_addr).unwrap();
    data.set_read_timeout(Some(READ_TIMEOUT)).unwrap();

    assert!(client.command("RETR once.txt").starts_with("150"));
    assert_eq!(read_to_end(&mut data), b"once");
    assert!(client.read_reply().starts_with("226"));

    // the ephemeral listener is discarded after the first accept; nobody
    // is listening there any more
    assert!(TcpStream::connect(pasv_addr).is_err());
}

#[test]
fn test_nlst_lists_full_paths() {
    let server = start_server();
    fs::write(server.root.path().join("one.txt"), b"1").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    let mut data = client.pasv_data();
    assert!(client.command("NLST").starts_with("150"));

    let listing = String::from_utf8(read_to_end(&mut data)).unwrap();
    assert!(listing.contains("/one.txt"), "listing: {}", listing);
    assert!(client.read_reply().starts_with("226"));
}

#[test]
fn test_retr_missing_file() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("PASV").starts_with("227"));
    let reply = client.command("RETR nonexistent.txt");
    assert!(reply.starts_with("450"), "RETR reply: {}", reply);

    // the session stays usable
    assert!(client.command("NOOP").starts_with("200"));
}

#[test]
fn test_transfer_requires_data_setup() {
    let server = start_server();
    fs::write(server.root.path().join("file.txt"), b"data").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("RETR file.txt").starts_with("503"));
}

#[test]
fn test_retr_content_and_restart() {
    let server = start_server();
    fs::write(server.root.path().join("digits.txt"), b"0123456789").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    let mut data = client.pasv_data();
    assert!(client.command("RETR digits.txt").starts_with("150"));
    assert_eq!(read_to_end(&mut data), b"0123456789");
    assert!(client.read_reply().starts_with("226"));

    // restart offset applies to the next transfer only
    let mut data = client.pasv_data();
    assert!(client.command("REST 5").starts_with("350"));
    assert!(client.command("RETR digits.txt").starts_with("150"));
    assert_eq!(read_to_end(&mut data), b"56789");
    assert!(client.read_reply().starts_with("226"));

    // and is consumed: the next transfer starts at the beginning
    let mut data = client.pasv_data();
    assert!(client.command("RETR digits.txt").starts_with("150"));
    assert_eq!(read_to_end(&mut data), b"0123456789");
    assert!(client.read_reply().starts_with("226"));
}

#[test]
fn test_stor_uploads_file() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    let payload = vec![0x5Au8; 200 * 1024];

    let mut data = client.pasv_data();
    assert!(client.command("STOR upload.bin").starts_with("150"));
    data.write_all(&payload).unwrap();
    drop(data);

    assert!(client.read_reply().starts_with("226"));
    assert_eq!(fs::read(server.root.path().join("upload.bin")).unwrap(), payload);
}

#[test]
fn test_appe_appends() {
    let server = start_server();
    fs::write(server.root.path().join("log.txt"), b"first;").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    let mut data = client.pasv_data();
    assert!(client.command("APPE log.txt").starts_with("150"));
    data.write_all(b"second;").unwrap();
    drop(data);

    assert!(client.read_reply().starts_with("226"));
    assert_eq!(
        fs::read(server.root.path().join("log.txt")).unwrap(),
        b"first;second;"
    );
}

#[test]
fn test_port_mode_transfer() {
    let server = start_server();
    fs::write(server.root.path().join("active.txt"), b"active mode").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    // client-side data listener the server will connect to
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let reply = client.command(&format!("PORT 127,0,0,1,{},{}", port >> 8, port & 0xFF));
    assert!(reply.starts_with("200"), "PORT reply: {}", reply);

    client.send("RETR active.txt");

    let (mut data, _) = listener.accept().unwrap();
    data.set_read_timeout(Some(READ_TIMEOUT)).unwrap();

    assert!(client.read_reply().starts_with("150"));
    assert_eq!(read_to_end(&mut data), b"active mode");
    assert!(client.read_reply().starts_with("226"));
}

#[test]
fn test_port_rejects_foreign_address() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("PORT 10,1,2,3,8,10").starts_with("501"));
    assert!(client.command("PORT not,an,address").starts_with("501"));
}

#[test]
fn test_directory_lifecycle() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("PWD").starts_with("257 \"/\""));
    assert!(client.command("MKD sub").starts_with("257"));
    assert!(client.command("CWD sub").starts_with("250"));
    assert!(client.command("PWD").starts_with("257 \"/sub\""));
    assert!(client.command("CDUP").starts_with("250"));
    assert!(client.command("PWD").starts_with("257 \"/\""));
    assert!(client.command("RMD sub").starts_with("250"));

    assert!(client.command("CWD missing").starts_with("550"));
    // failed CWD leaves the working directory untouched
    assert!(client.command("PWD").starts_with("257 \"/\""));
}

#[test]
fn test_dele_removes_file() {
    let server = start_server();
    fs::write(server.root.path().join("doomed.txt"), b"x").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("DELE doomed.txt").starts_with("250"));
    assert!(!server.root.path().join("doomed.txt").exists());
    assert!(client.command("DELE doomed.txt").starts_with("550"));
}

#[test]
fn test_path_confinement() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    // escapes are rejected, never clamped
    assert!(client.command("CWD ..").starts_with("550"));
    assert!(client.command("CWD ../..").starts_with("550"));
    assert!(client.command("RETR ../../etc/passwd").starts_with("553"));
    assert!(client.command("MKD ../outside").starts_with("553"));
    assert!(client.command("DELE /..").starts_with("553"));

    // the working directory never moved
    assert!(client.command("PWD").starts_with("257 \"/\""));

    // dot-dot segments that stay inside the root are fine
    fs::create_dir(server.root.path().join("inner")).unwrap();
    assert!(client.command("CWD inner/../inner").starts_with("250"));
}

#[test]
fn test_rename_two_step() {
    let server = start_server();
    fs::write(server.root.path().join("old.txt"), b"payload").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    // confirm without a source is a protocol error
    assert!(client.command("RNTO new.txt").starts_with("503"));

    // the straightforward rename works
    assert!(client.command("RNFR old.txt").starts_with("350"));
    assert!(client.command("RNTO new.txt").starts_with("250"));
    assert!(server.root.path().join("new.txt").exists());
    assert!(!server.root.path().join("old.txt").exists());

    // an intervening command clears the remembered source
    assert!(client.command("RNFR new.txt").starts_with("350"));
    assert!(client.command("NOOP").starts_with("200"));
    assert!(client.command("RNTO other.txt").starts_with("503"));

    // the source must exist
    assert!(client.command("RNFR missing.txt").starts_with("450"));
}

#[test]
fn test_size_and_mdtm() {
    let server = start_server();
    fs::write(server.root.path().join("sized.txt"), b"abcdef").unwrap();
    fs::create_dir(server.root.path().join("adir")).unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    assert_eq!(client.command("SIZE sized.txt"), "213 6");
    assert!(client.command("SIZE missing.txt").starts_with("550"));
    assert!(client.command("SIZE adir").starts_with("550"));

    let reply = client.command("MDTM sized.txt");
    assert!(reply.starts_with("213 "), "MDTM reply: {}", reply);
    let stamp = &reply[4..];
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_peer_killed_data_connection() {
    let server = start_server();
    fs::write(
        server.root.path().join("big.bin"),
        vec![0xA5u8; 4 * 1024 * 1024],
    )
    .unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    let mut data = client.pasv_data();
    assert!(client.command("RETR big.bin").starts_with("150"));

    // take a little data, then reset the connection mid-transfer
    let mut chunk = vec![0u8; 64 * 1024];
    data.read_exact(&mut chunk).unwrap();
    socket2::SockRef::from(&data)
        .set_linger(Some(Duration::from_secs(0)))
        .unwrap();
    drop(data);

    // transfer-fatal for the data phase only
    let reply = client.read_reply();
    assert!(reply.starts_with("426"), "reply: {}", reply);
    assert!(client.command("NOOP").starts_with("200"));
}

#[test]
fn test_abort_without_transfer() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("ABOR").starts_with("225"));
}

#[test]
fn test_informational_commands() {
    let server = start_server();
    let mut client = Client::connect(server.addr);
    client.login();

    assert!(client.command("SYST").starts_with("215"));
    assert!(client.command("NOOP").starts_with("200"));
    assert!(client.command("TYPE I").starts_with("200"));
    assert!(client.command("MODE S").starts_with("200"));
    assert!(client.command("MODE B").starts_with("504"));
    assert!(client.command("STRU F").starts_with("200"));
    assert!(client.command("FROBNICATE").starts_with("502"));

    client.send("FEAT");
    let lines = client.read_multiline("211");
    assert!(lines.iter().any(|line| line.contains("SIZE")));
    assert!(lines.iter().any(|line| line.contains("MDTM")));
}

#[test]
fn test_stat_listing_over_control() {
    let server = start_server();
    fs::write(server.root.path().join("inline.txt"), b"inline").unwrap();

    let mut client = Client::connect(server.addr);
    client.login();

    // STAT of a path streams the listing over the control connection; no
    // data connection is involved
    client.send("STAT /");
    let lines = client.read_multiline("213");
    assert!(lines[0].starts_with("213-"), "lines: {:?}", lines);
    assert!(
        lines.iter().any(|line| line.contains("inline.txt")),
        "lines: {:?}",
        lines
    );
    assert!(lines.last().unwrap().starts_with("213 "));

    // plain STAT reports server status
    client.send("STAT");
    let lines = client.read_multiline("211");
    assert!(lines[0].starts_with("211-"));
}

#[test]
fn test_quit_closes_connection() {
    let server = start_server();
    let mut client = Client::connect(server.addr);

    assert!(client.command("QUIT").starts_with("221"));

    // the server closes its side after the reply flushes
    let mut rest = Vec::new();
    let n = client.reader.read_to_end(&mut rest).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn test_multiple_sessions() {
    let server = start_server();
    fs::write(server.root.path().join("shared.txt"), b"shared").unwrap();

    let mut first = Client::connect(server.addr);
    let mut second = Client::connect(server.addr);

    first.login();
    second.login();

    assert_eq!(first.command("SIZE shared.txt"), "213 6");
    assert_eq!(second.command("SIZE shared.txt"), "213 6");

    assert!(first.command("QUIT").starts_with("221"));
    assert!(second.command("NOOP").starts_with("200"));
}
