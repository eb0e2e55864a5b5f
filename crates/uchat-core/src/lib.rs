//! UChat Core Protocol Engine
//!
//! Peer-to-peer conversations over plain TCP. Every client listens on a well
//! known port; a conversation is one TCP connection between two clients that
//! carries length-prefixed greeting, chat, and farewell frames.
//!
//! The [`SessionManager`] runs a single event loop that accepts peers, applies
//! the conversation state machine, and reports to the UI through
//! [`SessionEvent`]s. The UI drives it with a [`SessionHandle`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod conversation;
pub mod errors;
pub mod events;
pub mod port_mapping;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{SessionConfig, DEFAULT_LISTEN_PORT};
pub use conversation::{Conversation, ConversationState, Direction, HistoryEntry, RecordOutcome};
pub use errors::{
    DecodeError, EncodeError, ErrorKind, NetworkError, ProtocolPolicyError, Result, UchatError,
};
pub use events::{ConversationSummary, SessionCommand, SessionEvent, SessionHandle};
pub use port_mapping::PortMapper;
pub use protocol::{ChatMessage, GreetingMessage, Message, MessageKind};
pub use session::SessionManager;
pub use transport::{Multiplexer, Readiness, SocketHandle, TransportSocket};
pub use types::{FixedTimeSource, Peer, PeerColor, SystemTimeSource, TimeSource};
