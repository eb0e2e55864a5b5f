//! Peer address parsing for user input

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{CliError, Result};

/// Parse `ip` or `ip:port`; a bare IPv4 address gets `default_port`
pub fn parse_peer_address(input: &str, default_port: u16) -> Result<SocketAddr> {
    let input = input.trim();
    match input.split_once(':') {
        Some((ip, port)) => {
            let port = parse_port(port)?;
            Ok(SocketAddr::V4(SocketAddrV4::new(parse_ipv4(ip)?, port)))
        }
        None => Ok(SocketAddr::V4(SocketAddrV4::new(
            parse_ipv4(input)?,
            default_port,
        ))),
    }
}

/// Dotted-quad IPv4 address
pub fn parse_ipv4(input: &str) -> Result<Ipv4Addr> {
    input
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidAddress(format!("`{}` is not an IPv4 address", input)))
}

pub fn parse_port(input: &str) -> Result<u16> {
    input
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidAddress(format!("`{}` is not a port number", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_ip_uses_default_port() {
        let addr = parse_peer_address("192.168.1.20", 52789).unwrap();
        assert_eq!(addr, "192.168.1.20:52789".parse().unwrap());
    }

    #[test]
    fn test_explicit_port() {
        let addr = parse_peer_address(" 10.0.0.1:4000 ", 52789).unwrap();
        assert_eq!(addr.port(), 4000);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(parse_peer_address("256.0.0.1", 1).is_err());
        assert!(parse_peer_address("1.2.3", 1).is_err());
        assert!(parse_peer_address("10.0.0.1:70000", 1).is_err());
        assert!(parse_peer_address("example.com", 1).is_err());
        assert!(parse_port("-1").is_err());
    }
}
