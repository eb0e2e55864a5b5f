//! Conversation State Machine
//!
//! A conversation moves `Inactive -> Await -> Active -> Closed`, driven by the
//! greetings and farewells exchanged with one remote peer. Inbound messages
//! are gated by the kinds the current state expects; outbound messages are
//! gated by the session manager before they reach the wire.

use std::fmt;

use tracing::{debug, error};

use crate::protocol::{Message, MessageKind};
use crate::transport::{SocketHandle, TransportSocket};
use crate::types::Peer;

// ----------------------------------------------------------------------------
// Conversation State
// ----------------------------------------------------------------------------

/// Lifecycle state of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationState {
    /// Created, no accepted greeting yet
    #[default]
    Inactive,
    /// Local side proposed, waiting for the peer's answer
    Await,
    /// Both sides agreed to talk
    Active,
    /// Terminal; no message changes the state again
    Closed,
}

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Written by the local user
    Sent,
    /// Read from the remote peer
    Received,
}

const GREETING_ONLY: &[MessageKind] = &[MessageKind::Greeting];
const CHAT_OR_FAREWELL: &[MessageKind] = &[MessageKind::Chat, MessageKind::Farewell];

impl ConversationState {
    /// Get state name for debugging
    pub fn state_name(&self) -> &'static str {
        match self {
            ConversationState::Inactive => "inactive",
            ConversationState::Await => "awaiting",
            ConversationState::Active => "active",
            ConversationState::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConversationState::Closed)
    }

    /// Kinds of inbound message this state accepts
    pub fn expected_kinds(&self) -> &'static [MessageKind] {
        match self {
            ConversationState::Inactive | ConversationState::Await => GREETING_ONLY,
            ConversationState::Active => CHAT_OR_FAREWELL,
            ConversationState::Closed => &[],
        }
    }

    pub fn expects(&self, kind: MessageKind) -> bool {
        self.expected_kinds().contains(&kind)
    }

    /// State reached after `message` travels in `direction`.
    ///
    /// Pure: gating by [`Self::expected_kinds`] is applied by
    /// [`Conversation::record`], not here.
    pub fn transition(self, message: &Message, direction: Direction) -> Self {
        if self.is_closed() {
            return self;
        }

        match message {
            Message::Greeting(greeting) if !greeting.wants_to_talk => ConversationState::Closed,
            Message::Greeting(greeting) if greeting.ack => ConversationState::Active,
            Message::Greeting(_) => match direction {
                Direction::Sent => ConversationState::Await,
                Direction::Received => ConversationState::Inactive,
            },
            Message::Farewell => ConversationState::Closed,
            Message::Chat(_) => self,
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// History
// ----------------------------------------------------------------------------

/// One message in a conversation log, attributed to its sender
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub message: Message,
}

/// What recording a message did to the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The message was accepted; `from` and `to` may be equal
    Applied {
        from: ConversationState,
        to: ConversationState,
    },
    /// Inbound message of a kind the state does not expect; logged only
    Unexpected { state: ConversationState },
}

impl RecordOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RecordOutcome::Applied { .. })
    }
}

// ----------------------------------------------------------------------------
// Conversation
// ----------------------------------------------------------------------------

/// Exchange with one remote peer
#[derive(Debug)]
pub struct Conversation {
    local: Peer,
    remote: Peer,
    state: ConversationState,
    socket: Option<TransportSocket>,
    control_log: Vec<HistoryEntry>,
    chat_log: Vec<HistoryEntry>,
    /// Started by the remote peer on a connection we accepted
    inbound: bool,
}

impl Conversation {
    pub fn new(local: Peer, remote: Peer) -> Self {
        Self {
            local,
            remote,
            state: ConversationState::Inactive,
            socket: None,
            control_log: Vec::new(),
            chat_log: Vec::new(),
            inbound: false,
        }
    }

    /// Conversation for a connection accepted from `remote`
    pub fn inbound(local: Peer, remote: Peer, socket: TransportSocket) -> Self {
        Self {
            socket: Some(socket),
            inbound: true,
            ..Self::new(local, remote)
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn local(&self) -> &Peer {
        &self.local
    }

    pub fn remote(&self) -> &Peer {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut Peer {
        &mut self.remote
    }

    /// Greetings and farewells, oldest first
    pub fn control_log(&self) -> &[HistoryEntry] {
        &self.control_log
    }

    /// Chat messages, oldest first
    pub fn chat_log(&self) -> &[HistoryEntry] {
        &self.chat_log
    }

    pub fn socket(&self) -> Option<&TransportSocket> {
        self.socket.as_ref()
    }

    pub fn socket_mut(&mut self) -> Option<&mut TransportSocket> {
        self.socket.as_mut()
    }

    pub fn socket_handle(&self) -> Option<SocketHandle> {
        self.socket.as_ref().map(TransportSocket::handle)
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    /// Attach a socket, returning the one it replaces
    pub fn attach_socket(&mut self, socket: TransportSocket) -> Option<TransportSocket> {
        self.socket.replace(socket)
    }

    /// Append `message` to the history and advance the state.
    ///
    /// Received messages whose kind the current state does not expect are
    /// logged and kept in the history without changing the state.
    pub fn record(&mut self, message: Message, direction: Direction) -> RecordOutcome {
        let from = self.state;
        let kind = message.kind();

        let outcome = if direction == Direction::Received && !from.expects(kind) {
            error!(
                "Unexpected {} from {} while {}",
                kind,
                self.remote.address(),
                from
            );
            RecordOutcome::Unexpected { state: from }
        } else {
            let to = from.transition(&message, direction);
            if to != from {
                debug!(
                    "Conversation with {}: {} -> {} on {:?} {}",
                    self.remote.address(),
                    from,
                    to,
                    direction,
                    kind
                );
            }
            self.state = to;
            RecordOutcome::Applied { from, to }
        };

        let entry = HistoryEntry { direction, message };
        if kind == MessageKind::Chat {
            self.chat_log.push(entry);
        } else {
            self.control_log.push(entry);
        }
        outcome
    }

    /// Free the socket and force the conversation into `Closed`
    pub async fn teardown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.free().await;
        }
        self.state = ConversationState::Closed;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, GreetingMessage};
    use std::net::SocketAddr;

    use ConversationState::*;
    use Direction::*;

    fn greeting(ack: bool, wants_to_talk: bool) -> Message {
        Message::Greeting(GreetingMessage::new(0xFFAABB, "alice", ack, wants_to_talk))
    }

    fn chat() -> Message {
        Message::Chat(ChatMessage::new("hi", 1.0))
    }

    fn conversation() -> Conversation {
        let local: SocketAddr = "127.0.0.1:52789".parse().unwrap();
        let remote: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        Conversation::new(
            Peer::local(local, "me", Default::default()),
            Peer::remote(remote),
        )
    }

    #[test]
    fn test_transition_table() {
        let open_states = [Inactive, Await, Active];
        for state in open_states {
            for direction in [Sent, Received] {
                assert_eq!(state.transition(&greeting(false, false), direction), Closed);
                assert_eq!(state.transition(&greeting(true, false), direction), Closed);
                assert_eq!(state.transition(&greeting(true, true), direction), Active);
                assert_eq!(state.transition(&Message::Farewell, direction), Closed);
                assert_eq!(state.transition(&chat(), direction), state);
            }
            assert_eq!(state.transition(&greeting(false, true), Sent), Await);
            assert_eq!(state.transition(&greeting(false, true), Received), Inactive);
        }
    }

    #[test]
    fn test_closed_is_absorbing() {
        let inputs = [
            greeting(false, false),
            greeting(false, true),
            greeting(true, false),
            greeting(true, true),
            chat(),
            Message::Farewell,
        ];
        for message in &inputs {
            for direction in [Sent, Received] {
                assert_eq!(Closed.transition(message, direction), Closed);
            }
        }
    }

    #[test]
    fn test_expected_kinds() {
        assert_eq!(Inactive.expected_kinds(), &[MessageKind::Greeting]);
        assert_eq!(Await.expected_kinds(), &[MessageKind::Greeting]);
        assert_eq!(
            Active.expected_kinds(),
            &[MessageKind::Chat, MessageKind::Farewell]
        );
        assert!(Closed.expected_kinds().is_empty());
        assert!(!Active.expects(MessageKind::Greeting));
    }

    #[test]
    fn test_local_initiated_handshake() {
        let mut conv = conversation();

        conv.record(greeting(false, true), Sent);
        assert_eq!(conv.state(), Await);

        let outcome = conv.record(greeting(true, true), Received);
        assert_eq!(
            outcome,
            RecordOutcome::Applied {
                from: Await,
                to: Active
            }
        );

        conv.record(chat(), Sent);
        conv.record(chat(), Received);
        assert_eq!(conv.state(), Active);
        assert_eq!(conv.chat_log().len(), 2);
        assert_eq!(conv.control_log().len(), 2);
        assert_eq!(conv.chat_log()[1].direction, Received);
    }

    #[test]
    fn test_peer_initiated_handshake() {
        let mut conv = conversation();

        conv.record(greeting(false, true), Received);
        assert_eq!(conv.state(), Inactive);

        conv.record(greeting(true, true), Sent);
        assert_eq!(conv.state(), Active);

        conv.record(Message::Farewell, Received);
        assert_eq!(conv.state(), Closed);
    }

    #[test]
    fn test_unexpected_inbound_is_recorded_without_effect() {
        let mut conv = conversation();

        let outcome = conv.record(chat(), Received);
        assert_eq!(outcome, RecordOutcome::Unexpected { state: Inactive });
        assert!(!outcome.is_applied());
        assert_eq!(conv.state(), Inactive);
        assert_eq!(conv.chat_log().len(), 1);

        let outcome = conv.record(Message::Farewell, Received);
        assert_eq!(outcome, RecordOutcome::Unexpected { state: Inactive });
        assert_eq!(conv.state(), Inactive);
    }

    #[test]
    fn test_inbound_in_closed_is_unexpected() {
        let mut conv = conversation();
        conv.record(Message::Farewell, Sent);
        assert_eq!(conv.state(), Closed);

        for message in [greeting(true, true), chat(), Message::Farewell] {
            let outcome = conv.record(message, Received);
            assert_eq!(outcome, RecordOutcome::Unexpected { state: Closed });
        }
        assert_eq!(conv.state(), Closed);
        assert_eq!(conv.control_log().len(), 3);
        assert_eq!(conv.chat_log().len(), 1);
    }

    #[test]
    fn test_outbound_not_gated_by_expected_kinds() {
        let mut conv = conversation();
        let outcome = conv.record(Message::Farewell, Sent);
        assert_eq!(
            outcome,
            RecordOutcome::Applied {
                from: Inactive,
                to: Closed
            }
        );
    }

    #[tokio::test]
    async fn test_teardown_forces_closed() {
        let mut conv = conversation();
        conv.record(greeting(false, true), Sent);

        conv.teardown().await;
        assert_eq!(conv.state(), Closed);
        assert!(!conv.has_socket());
        assert_eq!(conv.control_log().len(), 1);

        conv.teardown().await;
        assert_eq!(conv.state(), Closed);
    }
}
