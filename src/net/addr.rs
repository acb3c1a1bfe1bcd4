//! Socket-address helpers
//!
//! Conversions between `SocketAddrV4` and the comma-separated
//! `h1,h2,h3,h4,p1,p2` form used by the PASV reply and the PORT argument.

use std::net::{Ipv4Addr, SocketAddrV4};

/// Render an address in the FTP `h1,h2,h3,h4,p1,p2` form for a 227 reply.
pub fn format_pasv(addr: &SocketAddrV4) -> String {
    let ip = addr.ip().octets();
    let port = addr.port();
    format!(
        "{},{},{},{},{},{}",
        ip[0],
        ip[1],
        ip[2],
        ip[3],
        port >> 8,
        port & 0xFF
    )
}

/// Parse a PORT argument of the form `h1,h2,h3,h4,p1,p2`.
///
/// Every field must be a decimal number in `0..=255`; anything else is a
/// syntax error reported to the client.
pub fn parse_port_target(arg: &str) -> Option<SocketAddrV4> {
    let mut fields = [0u8; 6];
    let mut count = 0;

    for part in arg.split(',') {
        if count == 6 {
            return None;
        }
        fields[count] = part.trim().parse::<u8>().ok()?;
        count += 1;
    }

    if count != 6 {
        return None;
    }

    let ip = Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]);
    let port = (u16::from(fields[4]) << 8) | u16::from(fields[5]);
    Some(SocketAddrV4::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pasv() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 2122);
        // 2122 == 8 * 256 + 74
        assert_eq!(format_pasv(&addr), "127,0,0,1,8,74");
    }

    #[test]
    fn test_parse_port_target() {
        let addr = parse_port_target("192,168,1,2,7,233").unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(addr.port(), 7 * 256 + 233);
    }

    #[test]
    fn test_round_trip() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 42, 9), 61234);
        assert_eq!(parse_port_target(&format_pasv(&addr)), Some(addr));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_port_target(""), None);
        assert_eq!(parse_port_target("1,2,3,4,5"), None);
        assert_eq!(parse_port_target("1,2,3,4,5,6,7"), None);
        assert_eq!(parse_port_target("1,2,3,4,5,256"), None);
        assert_eq!(parse_port_target("a,b,c,d,e,f"), None);
        assert_eq!(parse_port_target("1.2.3.4:5"), None);
    }
}
