//! Error types for the UChat protocol engine
//!
//! Every failure the core can surface falls into one of four families:
//! network failures on a single socket, malformed frames, messages that cannot
//! be encoded, and actions refused because of the conversation's state. The
//! [`UchatError`] type unifies them.

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::MessageKind;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// OS-level socket failures
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to bind listening socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out after {duration:?} while {operation}")]
    TimedOut {
        operation: &'static str,
        duration: Duration,
    },
    #[error("Failed to send to {address}: {source}")]
    Send {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to receive: {0}")]
    Receive(#[source] std::io::Error),
    #[error("Failed to accept inbound connection: {0}")]
    Accept(#[source] std::io::Error),
    #[error("Socket is not usable for {operation}: {reason}")]
    InvalidSocketState {
        operation: &'static str,
        reason: &'static str,
    },
    #[error("Connection closed by peer")]
    Closed,
    #[error("Stream can no longer be framed: {0}")]
    Desynchronized(#[source] DecodeError),
    #[error("Port mapping failed for port {port}: {reason}")]
    PortMapping { port: u16, reason: String },
}

/// Malformed frame or payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame length {declared} does not match body length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("Frame length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },
    #[error("Empty frame body")]
    EmptyFrame,
    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),
    #[error("Truncated {kind} payload: needed {needed} bytes, {available} available")]
    Truncated {
        kind: MessageKind,
        needed: usize,
        available: usize,
    },
    #[error("{kind} payload has {extra} trailing bytes")]
    TrailingBytes { kind: MessageKind, extra: usize },
    #[error("Invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("Username of {0} bytes exceeds the 20 byte limit")]
    UsernameTooLong(usize),
    #[error("Invalid UTF-8 in {0} payload")]
    InvalidUtf8(MessageKind),
}

/// Message that cannot be represented on the wire
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Username of {0} bytes exceeds the 20 byte limit")]
    UsernameTooLong(usize),
    #[error("Chat text of {0} bytes exceeds the 65535 byte limit")]
    TextTooLong(usize),
    #[error("Color {0:#x} does not fit in 24 bits")]
    ColorOutOfRange(u32),
}

/// Action refused because of the state of a conversation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolPolicyError {
    #[error("No conversation exists for peer {0}")]
    NoConversation(SocketAddr),
    #[error("Cannot {action} while conversation with {peer} is {state}")]
    InvalidState {
        peer: SocketAddr,
        action: &'static str,
        state: &'static str,
    },
    #[error("Refusing to send an empty chat message")]
    EmptyChat,
    #[error("No pending inbound connection from {0}")]
    NotPending(SocketAddr),
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Coarse classification used when errors are reported to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Decode,
    Encode,
    Policy,
    Config,
    Session,
}

/// Core error type for the UChat protocol engine
#[derive(Debug, thiserror::Error)]
pub enum UchatError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Protocol policy error: {0}")]
    Policy(#[from] ProtocolPolicyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session event loop has stopped")]
    SessionStopped,
}

impl UchatError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Encode(_) => ErrorKind::Encode,
            Self::Policy(_) => ErrorKind::Policy,
            Self::Config(_) => ErrorKind::Config,
            Self::SessionStopped => ErrorKind::Session,
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, UchatError>;
