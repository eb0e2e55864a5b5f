//! Transport layer
//!
//! - `socket`: a single TCP endpoint, listening or connected
//! - `multiplexer`: readiness polling over the listener and all peer sockets

pub mod multiplexer;
pub mod socket;

pub use multiplexer::{Multiplexer, Readiness};
pub use socket::{SocketHandle, TransportSocket};
