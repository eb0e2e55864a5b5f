//! Core types for the UChat protocol
//!
//! Peer identity, display colors, and the clock abstraction used to stamp
//! chat messages.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Color
// ----------------------------------------------------------------------------

/// Display color of a peer, a 24-bit RGB value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerColor(u32);

/// Largest representable color
pub const MAX_COLOR: u32 = 0x00FF_FFFF;

impl PeerColor {
    /// Create a color from its packed RGB value, rejecting values above 24 bits
    pub fn new(rgb: u32) -> Option<Self> {
        (rgb <= MAX_COLOR).then_some(Self(rgb))
    }

    /// Packed RGB value as carried on the wire
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl FromStr for PeerColor {
    type Err = InvalidColor;

    /// Parse `#RGB`, `#RRGGBB`, `0xRRGGBB` or bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('#')
            .or_else(|| trimmed.strip_prefix("0x"))
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidColor(s.to_string()));
        }

        let expanded: String = match digits.len() {
            3 => digits.chars().flat_map(|c| [c, c]).collect(),
            6 => digits.to_string(),
            _ => return Err(InvalidColor(s.to_string())),
        };

        u32::from_str_radix(&expanded, 16)
            .map(PeerColor)
            .map_err(|_| InvalidColor(s.to_string()))
    }
}

impl fmt::Display for PeerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06X}", self.0)
    }
}

impl TryFrom<String> for PeerColor {
    type Error = InvalidColor;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerColor> for String {
    fn from(color: PeerColor) -> Self {
        color.to_string()
    }
}

/// Error returned when a color string is not a hex triple or sextet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid color `{0}`: expected a hex triple or sextet such as #FAB or #9AB20A")]
pub struct InvalidColor(pub String);

// ----------------------------------------------------------------------------
// Peer
// ----------------------------------------------------------------------------

/// A participant in a conversation, either the local user or a remote client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    address: SocketAddr,
    username: String,
    color: PeerColor,
    is_self: bool,
}

impl Peer {
    /// Create the local user's identity
    pub fn local(address: SocketAddr, username: impl Into<String>, color: PeerColor) -> Self {
        Self {
            address,
            username: username.into(),
            color,
            is_self: true,
        }
    }

    /// Create a remote peer known only by its address
    pub fn remote(address: SocketAddr) -> Self {
        Self {
            address,
            username: String::new(),
            color: PeerColor::default(),
            is_self: false,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn color(&self) -> PeerColor {
        self.color
    }

    /// Whether this peer is the local user
    pub fn is_self(&self) -> bool {
        self.is_self
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    pub fn set_color(&mut self, color: PeerColor) {
        self.color = color;
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Clock used to stamp outgoing chat messages, in Unix epoch seconds
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock implementation of [`TimeSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Fixed clock for deterministic tests
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub f64);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parsing() {
        assert_eq!("#9AB20A".parse::<PeerColor>().unwrap().as_u32(), 0x9AB20A);
        assert_eq!("0xff0000".parse::<PeerColor>().unwrap().as_u32(), 0xFF0000);
        assert_eq!("00ff00".parse::<PeerColor>().unwrap().as_u32(), 0x00FF00);
        assert_eq!("#FAB".parse::<PeerColor>().unwrap().as_u32(), 0xFFAABB);
    }

    #[test]
    fn test_color_rejects_garbage() {
        assert!("#12345".parse::<PeerColor>().is_err());
        assert!("#GGGGGG".parse::<PeerColor>().is_err());
        assert!("".parse::<PeerColor>().is_err());
        assert!(PeerColor::new(0x0100_0000).is_none());
    }

    #[test]
    fn test_color_display_roundtrip() {
        let color: PeerColor = "#fab".parse().unwrap();
        assert_eq!(color.to_string(), "#FFAABB");
        assert_eq!(color.to_string().parse::<PeerColor>().unwrap(), color);
    }

    #[test]
    fn test_peer_setters() {
        let addr: SocketAddr = "127.0.0.1:52789".parse().unwrap();
        let mut peer = Peer::remote(addr);
        assert!(!peer.is_self());
        assert!(Peer::local(addr, "me", PeerColor::default()).is_self());
        assert_eq!(peer.username(), "");

        peer.set_username("bob");
        peer.set_color(PeerColor::new(0x123456).unwrap());
        assert_eq!(peer.username(), "bob");
        assert_eq!(peer.address(), addr);
        assert_eq!(peer.color().to_string(), "#123456");
    }
}
