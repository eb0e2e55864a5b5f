//! Session Manager
//!
//! Owns the local identity, the multiplexer (and through it the listening
//! socket), and one [`Conversation`] per remote peer. It applies the outbound
//! policy, reacts to inbound frames, and reports to the UI through
//! [`SessionEvent`]s.
//!
//! [`SessionManager::run`] is the event loop: it waits on the command channel
//! and the multiplexer and handles whichever is ready first.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::conversation::{Conversation, ConversationState, Direction, RecordOutcome};
use crate::errors::{ErrorKind, NetworkError, ProtocolPolicyError, Result, UchatError};
use crate::events::{ConversationSummary, SessionCommand, SessionEvent, SessionHandle};
use crate::port_mapping::PortMapper;
use crate::protocol::{encode, ChatMessage, FrameError, GreetingMessage, Message, MAX_USERNAME_LEN};
use crate::transport::{Multiplexer, Readiness, TransportSocket};
use crate::types::{Peer, PeerColor, SystemTimeSource, TimeSource};

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

pub struct SessionManager {
    config: SessionConfig,
    local: Peer,
    multiplexer: Multiplexer,
    conversations: HashMap<SocketAddr, Conversation>,
    focused: Option<SocketAddr>,
    events: mpsc::Sender<SessionEvent>,
    time_source: Box<dyn TimeSource>,
    port_mapper: Option<Box<dyn PortMapper>>,
    /// Set after a failed accept until the next one succeeds
    accept_failing: bool,
}

impl SessionManager {
    /// Start listening and create a session for the local user
    pub async fn bind(
        config: SessionConfig,
        username: &str,
        color: PeerColor,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        config.validate()?;
        if username.len() > MAX_USERNAME_LEN {
            return Err(UchatError::config(format!(
                "username must be at most {} bytes",
                MAX_USERNAME_LEN
            )));
        }

        let listener = TransportSocket::listen(config.listen_port, config.io_timeout()).await?;
        let local_address = listener
            .local_address()
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.listen_port)));

        info!(
            "Session started for {} on {}",
            if username.is_empty() { "anonymous" } else { username },
            local_address
        );

        Ok(Self {
            config,
            local: Peer::local(local_address, username, color),
            multiplexer: Multiplexer::new(listener),
            conversations: HashMap::new(),
            focused: None,
            events,
            time_source: Box::new(SystemTimeSource),
            port_mapper: None,
            accept_failing: false,
        })
    }

    pub fn with_time_source(mut self, time_source: impl TimeSource + 'static) -> Self {
        self.time_source = Box::new(time_source);
        self
    }

    /// Use `mapper` to forward the listening port when port mapping is enabled
    pub fn with_port_mapper(mut self, mapper: impl PortMapper + 'static) -> Self {
        self.port_mapper = Some(Box::new(mapper));
        self
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local
    }

    /// Address the listening socket is bound to
    pub fn local_address(&self) -> SocketAddr {
        self.local.address()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn conversation(&self, peer: &SocketAddr) -> Option<&Conversation> {
        self.conversations.get(peer)
    }

    pub fn focused(&self) -> Option<SocketAddr> {
        self.focused
    }

    // ------------------------------------------------------------------------
    // Conversation Lifecycle
    // ------------------------------------------------------------------------

    /// Register a conversation with `peer`, attaching an accepted socket.
    ///
    /// An open conversation with the same peer is kept, and a supplied socket
    /// is dropped. A closed one is replaced.
    pub fn create_conversation(
        &mut self,
        peer: SocketAddr,
        socket: Option<TransportSocket>,
    ) -> &mut Conversation {
        match self.conversations.entry(peer) {
            Entry::Occupied(entry) if !entry.get().state().is_closed() => {
                if let Some(socket) = socket {
                    warn!(
                        "Dropping {} from {}: conversation already open",
                        socket.handle(),
                        peer
                    );
                }
                entry.into_mut()
            }
            entry => {
                let remote = Peer::remote(peer);
                let conversation = match socket {
                    Some(socket) => Conversation::inbound(self.local.clone(), remote, socket),
                    None => Conversation::new(self.local.clone(), remote),
                };
                debug!("Created conversation with {}", peer);
                match entry {
                    Entry::Occupied(mut closed) => {
                        closed.insert(conversation);
                        closed.into_mut()
                    }
                    Entry::Vacant(vacant) => vacant.insert(conversation),
                }
            }
        }
    }

    /// Stop polling, free the socket, and discard the conversation. Idempotent.
    pub async fn delete_conversation(&mut self, peer: SocketAddr) {
        let Some(mut conversation) = self.conversations.remove(&peer) else {
            return;
        };
        if let Some(handle) = conversation.socket_handle() {
            self.multiplexer.unregister(handle);
        }
        conversation.teardown().await;
        if self.focused == Some(peer) {
            self.focused = None;
        }
        debug!("Deleted conversation with {}", peer);
    }

    /// Close the conversation but keep it, and its history, in the map.
    ///
    /// Closed inbound conversations are dropped once they lose the focus,
    /// since their key is the peer's ephemeral port and is never reused.
    async fn teardown(&mut self, peer: SocketAddr) {
        let Some(conversation) = self.conversations.get_mut(&peer) else {
            return;
        };
        if let Some(handle) = conversation.socket_handle() {
            self.multiplexer.unregister(handle);
        }
        conversation.teardown().await;
        info!("Conversation with {} closed", peer);
        self.forget_if_finished(peer);
    }

    fn forget_if_finished(&mut self, peer: SocketAddr) {
        if self.focused == Some(peer) {
            return;
        }
        let finished = self
            .conversations
            .get(&peer)
            .is_some_and(|conv| conv.is_inbound() && conv.state().is_closed());
        if finished {
            self.conversations.remove(&peer);
            debug!("Dropped closed inbound conversation with {}", peer);
        }
    }

    /// Take in a connection from the listener and ask the user to approve it.
    ///
    /// The socket is not polled until [`Self::approve_connection`].
    pub async fn accept_inbound_connection(&mut self, accepted: Option<TransportSocket>) {
        let Some(mut socket) = accepted else {
            if !self.accept_failing {
                self.notify(SessionEvent::Notice {
                    kind: ErrorKind::Network,
                    message: "Failed to accept an inbound connection".to_string(),
                });
            }
            self.accept_failing = true;
            return;
        };
        self.accept_failing = false;

        let Some(peer) = socket.remote_address() else {
            warn!("Accepted {} has no remote address", socket.handle());
            socket.free().await;
            return;
        };

        self.create_conversation(peer, Some(socket));
        info!("Inbound connection from {} awaiting approval", peer);
        self.notify(SessionEvent::InboundConnection { peer });
    }

    /// Start reading from the pending inbound socket of `peer`
    pub fn approve_connection(&mut self, peer: SocketAddr) -> Result<()> {
        let conversation = self
            .conversations
            .get_mut(&peer)
            .ok_or(ProtocolPolicyError::NoConversation(peer))?;

        let pending = conversation
            .socket_handle()
            .is_some_and(|handle| !self.multiplexer.is_registered(handle));
        let socket = match conversation.socket_mut() {
            Some(socket) if pending => socket,
            _ => return Err(ProtocolPolicyError::NotPending(peer).into()),
        };

        if !self.multiplexer.register(socket, peer) {
            return Err(ProtocolPolicyError::NotPending(peer).into());
        }
        info!("Approved connection from {}", peer);
        Ok(())
    }

    /// Decline the pending inbound connection of `peer` and discard it
    pub async fn reject_connection(&mut self, peer: SocketAddr) -> Result<()> {
        if !self.conversations.contains_key(&peer) {
            return Err(ProtocolPolicyError::NoConversation(peer).into());
        }

        let decline = GreetingMessage::from_peer(&self.local, true, false);
        if let Err(err) = self.send(peer, decline.into()).await {
            warn!("Failed to send rejection to {}: {}", peer, err);
        }
        self.delete_conversation(peer).await;
        info!("Rejected connection from {}", peer);
        Ok(())
    }

    /// Create a conversation for a known address so it can be stored
    pub fn add_friend(&mut self, address: SocketAddr) {
        self.create_conversation(address, None);
        self.notify(SessionEvent::FriendAdded { peer: address });
    }

    /// Direct incoming chat notifications at `peer`
    pub fn focus(&mut self, peer: SocketAddr) -> Result<()> {
        if !self.conversations.contains_key(&peer) {
            return Err(ProtocolPolicyError::NoConversation(peer).into());
        }
        let previous = self.focused.replace(peer);
        if let Some(previous) = previous.filter(|previous| *previous != peer) {
            self.forget_if_finished(previous);
        }
        Ok(())
    }

    /// Summaries of every conversation, ordered by peer address
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        let mut summaries: Vec<_> = self
            .conversations
            .iter()
            .map(|(peer, conversation)| ConversationSummary {
                peer: *peer,
                username: conversation.remote().username().to_string(),
                color: conversation.remote().color(),
                state: conversation.state(),
                pending_approval: conversation
                    .socket_handle()
                    .is_some_and(|handle| !self.multiplexer.is_registered(handle))
                    && !conversation.state().is_closed(),
                chat_count: conversation.chat_log().len(),
                focused: self.focused == Some(*peer),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.peer);
        summaries
    }

    // ------------------------------------------------------------------------
    // Outbound Policy
    // ------------------------------------------------------------------------

    /// Greet `peer` with the local identity
    pub async fn send_greeting(&mut self, peer: SocketAddr, ack: bool) -> Result<()> {
        if !self.conversations.contains_key(&peer) {
            return Err(ProtocolPolicyError::NoConversation(peer).into());
        }
        let greeting = GreetingMessage::from_peer(&self.local, ack, true);
        self.send(peer, greeting.into()).await
    }

    /// Send a chat line, or propose the conversation if it is still inactive
    pub async fn send_chat(&mut self, peer: SocketAddr, text: &str) -> Result<()> {
        let state = self
            .conversations
            .get(&peer)
            .map(Conversation::state)
            .ok_or(ProtocolPolicyError::NoConversation(peer))?;

        if text.is_empty() {
            return Err(ProtocolPolicyError::EmptyChat.into());
        }

        match state {
            ConversationState::Active => {
                let timestamp = self.time_source.now() as f32;
                self.send(peer, ChatMessage::new(text, timestamp).into())
                    .await
            }
            ConversationState::Inactive => {
                debug!("Proposing conversation to {} instead of chatting", peer);
                self.send_greeting(peer, false).await
            }
            ConversationState::Await | ConversationState::Closed => {
                Err(ProtocolPolicyError::InvalidState {
                    peer,
                    action: "send a chat message",
                    state: state.state_name(),
                }
                .into())
            }
        }
    }

    /// Say goodbye and close the conversation, even if the write fails
    pub async fn send_farewell(&mut self, peer: SocketAddr) -> Result<()> {
        let state = self
            .conversations
            .get(&peer)
            .map(Conversation::state)
            .ok_or(ProtocolPolicyError::NoConversation(peer))?;

        if state.is_closed() {
            return Err(ProtocolPolicyError::InvalidState {
                peer,
                action: "say farewell",
                state: state.state_name(),
            }
            .into());
        }

        let sent = self.send(peer, Message::Farewell).await;
        self.teardown(peer).await;
        self.notify(SessionEvent::ConversationClosed { peer });
        sent
    }

    /// Write `message` to `peer`, connecting first if needed, then record it.
    ///
    /// Nothing is recorded when connecting or writing fails.
    pub async fn send(&mut self, peer: SocketAddr, message: Message) -> Result<()> {
        let conversation = self
            .conversations
            .get_mut(&peer)
            .ok_or(ProtocolPolicyError::NoConversation(peer))?;

        if conversation.state().is_closed() {
            return Err(ProtocolPolicyError::InvalidState {
                peer,
                action: "send",
                state: conversation.state().state_name(),
            }
            .into());
        }

        let bytes = encode(&message)?;

        if !conversation.has_socket() {
            let mut socket = TransportSocket::connect(
                peer,
                self.config.connect_timeout(),
                self.config.io_timeout(),
            )
            .await?;
            self.multiplexer.register(&mut socket, peer);
            conversation.attach_socket(socket);
        }

        let socket = conversation
            .socket_mut()
            .ok_or(NetworkError::InvalidSocketState {
                operation: "sending",
                reason: "conversation has no socket",
            })?;
        socket.send_bytes(&bytes).await?;

        debug!("Sent {} to {}", message.kind(), peer);
        conversation.record(message, Direction::Sent);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound Handling
    // ------------------------------------------------------------------------

    /// React to the listener or a peer socket becoming ready
    pub async fn handle_inbound_readiness(&mut self, readiness: Readiness) {
        let (handle, peer, outcome) = match readiness {
            Readiness::Listener(accepted) => {
                self.accept_inbound_connection(accepted).await;
                return;
            }
            Readiness::Socket {
                handle,
                peer,
                outcome,
            } => (handle, peer, outcome),
        };

        let owned = self
            .conversations
            .get(&peer)
            .is_some_and(|conv| conv.socket_handle() == Some(handle));
        if !owned {
            debug!("Ignoring stale readiness of {} for {}", handle, peer);
            return;
        }

        match outcome {
            Ok(message) => self.handle_message(peer, message).await,
            Err(FrameError::Malformed(err)) => {
                warn!("Discarding malformed frame from {}: {}", peer, err);
            }
            Err(FrameError::Broken(err)) => {
                info!("Connection to {} lost: {}", peer, err);
                self.teardown(peer).await;
                self.notify(SessionEvent::ConversationClosed { peer });
            }
        }
    }

    async fn handle_message(&mut self, peer: SocketAddr, message: Message) {
        let Some(conversation) = self.conversations.get_mut(&peer) else {
            return;
        };

        let outcome = conversation.record(message.clone(), Direction::Received);
        if let RecordOutcome::Unexpected { .. } = outcome {
            return;
        }

        match message {
            Message::Greeting(greeting) if greeting.ack => {
                self.on_greeting_response_received(peer, greeting).await
            }
            Message::Greeting(greeting) => self.on_greeting_received(peer, greeting).await,
            Message::Chat(chat) => self.on_chat_received(peer, chat),
            Message::Farewell => self.on_farewell_received(peer).await,
        }
    }

    /// Peer greeted us, either proposing or accepting a conversation
    async fn on_greeting_received(&mut self, peer: SocketAddr, greeting: GreetingMessage) {
        if !greeting.wants_to_talk {
            info!("{} ended the conversation before it started", peer);
            self.teardown(peer).await;
            self.notify(SessionEvent::ConversationClosed { peer });
            return;
        }

        self.update_remote_peer(peer, &greeting);

        if !greeting.ack {
            if let Err(err) = self.send_greeting(peer, true).await {
                warn!("Failed to answer greeting from {}: {}", peer, err);
                self.notify(SessionEvent::notice(&err));
                return;
            }
        }

        if let Some(conversation) = self.conversations.get(&peer) {
            if conversation.state() == ConversationState::Active {
                info!("Conversation with {} is active", peer);
                self.notify(SessionEvent::ConversationActive {
                    peer,
                    username: conversation.remote().username().to_string(),
                });
            }
        }
    }

    /// Peer answered our greeting
    async fn on_greeting_response_received(&mut self, peer: SocketAddr, greeting: GreetingMessage) {
        if !greeting.wants_to_talk {
            info!("{} declined the conversation", peer);
            self.teardown(peer).await;
            self.notify(SessionEvent::ConversationRejected { peer });
            return;
        }
        self.on_greeting_received(peer, greeting).await;
    }

    async fn on_farewell_received(&mut self, peer: SocketAddr) {
        info!("{} said farewell", peer);
        self.teardown(peer).await;
        self.notify(SessionEvent::ConversationClosed { peer });
    }

    fn on_chat_received(&mut self, peer: SocketAddr, chat: ChatMessage) {
        let Some(conversation) = self.conversations.get(&peer) else {
            return;
        };
        let remote = conversation.remote();
        self.notify(SessionEvent::ChatReceived {
            peer,
            username: remote.username().to_string(),
            color: remote.color(),
            text: chat.text,
            timestamp: chat.timestamp,
            focused: self.focused == Some(peer),
        });
    }

    fn update_remote_peer(&mut self, peer: SocketAddr, greeting: &GreetingMessage) {
        let Some(conversation) = self.conversations.get_mut(&peer) else {
            return;
        };

        let remote = conversation.remote_mut();
        remote.set_username(greeting.username.clone());
        match greeting.peer_color() {
            Some(color) => remote.set_color(color),
            None => warn!("{} sent invalid color {:#x}", peer, greeting.color),
        }

        let event = SessionEvent::PeerUpdated {
            peer,
            username: remote.username().to_string(),
            color: remote.color(),
        };
        self.notify(event);
    }

    // ------------------------------------------------------------------------
    // Event Loop
    // ------------------------------------------------------------------------

    /// Spawn the event loop on the current runtime
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.command_buffer_size);
        let task = tokio::spawn(self.run(rx));
        (SessionHandle::new(tx), task)
    }

    /// Wait for the next readiness event and handle it
    pub async fn step(&mut self) {
        let readiness = self.multiplexer.next_readiness().await;
        self.handle_inbound_readiness(readiness).await;
    }

    /// Serve commands and readiness until shutdown, then tear everything down
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        self.map_port();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                readiness = self.multiplexer.next_readiness() => {
                    self.handle_inbound_readiness(readiness).await;
                }
            }
        }

        self.destroy().await;
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::SendChat { peer, text } => self.send_chat(peer, &text).await,
            SessionCommand::Approve { peer } => self.approve_connection(peer),
            SessionCommand::Reject { peer } => self.reject_connection(peer).await,
            SessionCommand::Leave { peer } => self.send_farewell(peer).await,
            SessionCommand::AddFriend { address } => {
                self.add_friend(address);
                Ok(())
            }
            SessionCommand::Focus { peer } => self.focus(peer),
            SessionCommand::ListConversations { reply } => {
                if reply.send(self.conversations()).is_err() {
                    debug!("Conversation list requester went away");
                }
                Ok(())
            }
            SessionCommand::Shutdown => Ok(()),
        };

        if let Err(err) = result {
            warn!("{}", err);
            self.notify(SessionEvent::notice(&err));
        }
    }

    fn map_port(&mut self) {
        if !self.config.enable_port_mapping {
            return;
        }
        let port = self.local.address().port();
        let Some(mapper) = self.port_mapper.as_mut() else {
            debug!("Port mapping enabled but no mapper configured");
            return;
        };
        if let Err(err) = mapper.ensure_forwarded(port) {
            warn!("{}", err);
            self.notify(SessionEvent::notice(&UchatError::from(err)));
        }
    }

    /// Say farewell to every open conversation, drop them all, stop listening,
    /// and remove the port mapping
    pub async fn destroy(&mut self) {
        let peers: Vec<SocketAddr> = self.conversations.keys().copied().collect();

        for peer in peers {
            let should_greet = self
                .conversations
                .get(&peer)
                .is_some_and(|conv| conv.has_socket() && !conv.state().is_closed());
            if should_greet {
                if let Err(err) = self.send(peer, Message::Farewell).await {
                    debug!("Farewell to {} failed during shutdown: {}", peer, err);
                }
            }
            self.delete_conversation(peer).await;
        }

        self.multiplexer.shutdown().await;

        if self.config.enable_port_mapping {
            let port = self.local.address().port();
            if let Some(mapper) = self.port_mapper.as_mut() {
                if let Err(err) = mapper.remove_mapping(port) {
                    error!("{}", err);
                }
            }
        }
        info!("Session destroyed");
    }

    /// Emit an event without waiting on the UI
    fn notify(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver gone");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
