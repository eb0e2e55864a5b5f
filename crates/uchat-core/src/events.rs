//! Channel messages between the session event loop and the UI
//!
//! The UI drives the session with [`SessionCommand`]s sent through a
//! [`SessionHandle`] and observes it through [`SessionEvent`]s. Protocol state
//! never crosses this boundary.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use crate::conversation::ConversationState;
use crate::errors::{ErrorKind, Result, UchatError};
use crate::types::PeerColor;

// ----------------------------------------------------------------------------
// Events (Session -> UI)
// ----------------------------------------------------------------------------

/// Notification emitted by the session event loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A peer connected and awaits approval
    InboundConnection { peer: SocketAddr },
    /// Handshake completed
    ConversationActive { peer: SocketAddr, username: String },
    /// The peer declined our greeting
    ConversationRejected { peer: SocketAddr },
    /// Farewell received, hangup, or local teardown
    ConversationClosed { peer: SocketAddr },
    ChatReceived {
        peer: SocketAddr,
        username: String,
        color: PeerColor,
        text: String,
        timestamp: f32,
        /// Whether this conversation has the UI's focus
        focused: bool,
    },
    /// The peer announced its username and color
    PeerUpdated {
        peer: SocketAddr,
        username: String,
        color: PeerColor,
    },
    /// A conversation was created for a known address and should be stored
    FriendAdded { peer: SocketAddr },
    /// Error or informational message for the user
    Notice { kind: ErrorKind, message: String },
}

impl SessionEvent {
    pub fn notice(error: &UchatError) -> Self {
        SessionEvent::Notice {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Snapshot of one conversation for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub peer: SocketAddr,
    pub username: String,
    pub color: PeerColor,
    pub state: ConversationState,
    /// Connected but not yet approved by the user
    pub pending_approval: bool,
    pub chat_count: usize,
    pub focused: bool,
}

// ----------------------------------------------------------------------------
// Commands (UI -> Session)
// ----------------------------------------------------------------------------

/// Request handled by the session event loop
#[derive(Debug)]
pub enum SessionCommand {
    /// Send a chat line; proposes the conversation if it is not active yet
    SendChat { peer: SocketAddr, text: String },
    Approve { peer: SocketAddr },
    Reject { peer: SocketAddr },
    /// Say farewell and close the conversation
    Leave { peer: SocketAddr },
    AddFriend { address: SocketAddr },
    Focus { peer: SocketAddr },
    ListConversations {
        reply: oneshot::Sender<Vec<ConversationSummary>>,
    },
    /// Tear everything down and stop the loop
    Shutdown,
}

/// Cloneable sender side of the command channel
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { commands }
    }

    /// Queue a command for the event loop
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| UchatError::SessionStopped)
    }

    pub async fn send_chat(&self, peer: SocketAddr, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SendChat {
            peer,
            text: text.into(),
        })
        .await
    }

    pub async fn approve(&self, peer: SocketAddr) -> Result<()> {
        self.send(SessionCommand::Approve { peer }).await
    }

    pub async fn reject(&self, peer: SocketAddr) -> Result<()> {
        self.send(SessionCommand::Reject { peer }).await
    }

    pub async fn leave(&self, peer: SocketAddr) -> Result<()> {
        self.send(SessionCommand::Leave { peer }).await
    }

    pub async fn add_friend(&self, address: SocketAddr) -> Result<()> {
        self.send(SessionCommand::AddFriend { address }).await
    }

    pub async fn focus(&self, peer: SocketAddr) -> Result<()> {
        self.send(SessionCommand::Focus { peer }).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::ListConversations { reply }).await?;
        response.await.map_err(|_| UchatError::SessionStopped)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Whether the event loop has stopped receiving commands
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_reports_stopped_loop() {
        let (tx, rx) = mpsc::channel(1);
        let handle = SessionHandle::new(tx);
        drop(rx);

        assert!(handle.is_closed());
        let err = handle.shutdown().await.unwrap_err();
        assert!(matches!(err, UchatError::SessionStopped));
    }

    #[tokio::test]
    async fn test_handle_forwards_commands() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx);
        let peer: SocketAddr = "127.0.0.1:52789".parse().unwrap();

        handle.send_chat(peer, "hello").await.unwrap();
        match rx.recv().await.unwrap() {
            SessionCommand::SendChat { peer: to, text } => {
                assert_eq!(to, peer);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
