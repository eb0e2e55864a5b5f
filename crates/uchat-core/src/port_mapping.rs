//! Port forwarding collaborator
//!
//! Peers behind a NAT need the listening port forwarded by their router. The
//! session manager asks a [`PortMapper`] to set that up after it starts
//! listening and to undo it on shutdown. Failures are reported, never fatal.

use crate::errors::NetworkError;

/// Sets up and removes forwarding of the listening port
pub trait PortMapper: Send {
    /// Make `port` reachable from outside the local network
    fn ensure_forwarded(&mut self, port: u16) -> Result<(), NetworkError>;

    /// Remove a forwarding set up by [`Self::ensure_forwarded`]
    fn remove_mapping(&mut self, port: u16) -> Result<(), NetworkError>;
}

