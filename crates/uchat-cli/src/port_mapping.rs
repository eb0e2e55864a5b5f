//! Port forwarding for the terminal client
//!
//! There is no router integration; the user is told which port to forward.

use tracing::info;
use uchat_core::{NetworkError, PortMapper};

/// Asks the user to forward the listening port by hand
#[derive(Debug, Default)]
pub struct ManualPortMapper {
    forwarded: Option<u16>,
}

impl PortMapper for ManualPortMapper {
    fn ensure_forwarded(&mut self, port: u16) -> Result<(), NetworkError> {
        if port == 0 {
            return Err(NetworkError::PortMapping {
                port,
                reason: "cannot forward an ephemeral port".to_string(),
            });
        }
        info!(
            "Forward TCP port {} on your router so peers outside your network can reach you",
            port
        );
        self.forwarded = Some(port);
        Ok(())
    }

    fn remove_mapping(&mut self, port: u16) -> Result<(), NetworkError> {
        if self.forwarded.take() == Some(port) {
            info!("TCP port {} no longer needs to be forwarded", port);
        }
        Ok(())
    }
}
