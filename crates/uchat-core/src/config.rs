//! Session configuration
//!
//! Tunables for the session manager: where to listen, how long socket
//! operations may take, and how deep the channels to the UI are.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, UchatError};

/// Port peers expect a UChat client to listen on
pub const DEFAULT_LISTEN_PORT: u16 = 52789;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for a [`crate::SessionManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// TCP port to accept peers on; 0 picks an ephemeral port
    pub listen_port: u16,
    /// Upper bound for establishing an outbound connection
    pub connect_timeout_secs: u64,
    /// Upper bound for a single write, and for a frame body once its length
    /// prefix has arrived
    pub io_timeout_secs: u64,
    /// Buffer size for the event channel (session -> UI)
    pub event_buffer_size: usize,
    /// Buffer size for the command channel (UI -> session)
    pub command_buffer_size: usize,
    /// Ask the port mapper to forward `listen_port` on startup
    pub enable_port_mapping: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            connect_timeout_secs: 5,
            io_timeout_secs: 10,
            event_buffer_size: 128, // bursts of chat lines
            command_buffer_size: 32,
            enable_port_mapping: false,
        }
    }
}

impl SessionConfig {
    /// Create configuration optimized for testing: ephemeral port, short timeouts
    pub fn testing() -> Self {
        Self {
            listen_port: 0,
            connect_timeout_secs: 2,
            io_timeout_secs: 2,
            event_buffer_size: 100,
            command_buffer_size: 100,
            enable_port_mapping: false,
        }
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(UchatError::config("connect_timeout_secs must be positive"));
        }
        if self.io_timeout_secs == 0 {
            return Err(UchatError::config("io_timeout_secs must be positive"));
        }
        if self.event_buffer_size == 0 || self.command_buffer_size == 0 {
            return Err(UchatError::config("channel buffer sizes must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT);
        assert!(config.validate().is_ok());
        assert!(SessionConfig::testing().validate().is_ok());
        assert_eq!(config.io_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = SessionConfig {
            io_timeout_secs: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            command_buffer_size: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
