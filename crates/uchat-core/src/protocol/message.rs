//! UChat message types
//!
//! Three kinds of message travel between peers: a greeting that proposes,
//! accepts, or declines a conversation; a chat line; and a farewell that ends
//! the conversation.

use std::fmt;

use crate::types::{Peer, PeerColor};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum username length in bytes
pub const MAX_USERNAME_LEN: usize = 20;

/// Maximum chat text length in bytes
pub const MAX_CHAT_LEN: usize = u16::MAX as usize;

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// Wire discriminant of a message, also used to gate messages by state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Greeting = 0,
    Chat = 1,
    Farewell = 2,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Greeting),
            1 => Ok(MessageKind::Chat),
            2 => Ok(MessageKind::Farewell),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Greeting => "greeting",
            MessageKind::Chat => "chat",
            MessageKind::Farewell => "farewell",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Handshake message proposing, accepting, or declining a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingMessage {
    /// Sender's display color, packed RGB
    pub color: u32,
    /// Sender's username, at most [`MAX_USERNAME_LEN`] bytes
    pub username: String,
    /// True when this greeting answers a previously received one
    pub ack: bool,
    /// False declines the conversation or ends it before it started
    pub wants_to_talk: bool,
}

impl GreetingMessage {
    pub fn new(color: u32, username: impl Into<String>, ack: bool, wants_to_talk: bool) -> Self {
        Self {
            color,
            username: username.into(),
            ack,
            wants_to_talk,
        }
    }

    /// Greeting carrying the identity of `sender`
    pub fn from_peer(sender: &Peer, ack: bool, wants_to_talk: bool) -> Self {
        Self::new(sender.color().as_u32(), sender.username(), ack, wants_to_talk)
    }

    /// Sender color, if it is a valid 24-bit value
    pub fn peer_color(&self) -> Option<PeerColor> {
        PeerColor::new(self.color)
    }
}

/// A line of conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Unix epoch seconds; carried as `f32` on the wire
    pub timestamp: f32,
    pub text: String,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, timestamp: f32) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

/// A message exchanged between peers
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Greeting(GreetingMessage),
    Chat(ChatMessage),
    Farewell,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Greeting(_) => MessageKind::Greeting,
            Message::Chat(_) => MessageKind::Chat,
            Message::Farewell => MessageKind::Farewell,
        }
    }

    /// Whether the message belongs in the control log rather than the chat log
    pub fn is_control(&self) -> bool {
        !matches!(self, Message::Chat(_))
    }
}

impl From<GreetingMessage> for Message {
    fn from(greeting: GreetingMessage) -> Self {
        Message::Greeting(greeting)
    }
}

impl From<ChatMessage> for Message {
    fn from(chat: ChatMessage) -> Self {
        Message::Chat(chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_discriminants() {
        assert_eq!(MessageKind::Greeting.as_u8(), 0);
        assert_eq!(MessageKind::Chat.as_u8(), 1);
        assert_eq!(MessageKind::Farewell.as_u8(), 2);
        assert_eq!(MessageKind::try_from(1), Ok(MessageKind::Chat));
        assert_eq!(MessageKind::try_from(3), Err(3));
    }

    #[test]
    fn test_greeting_from_peer() {
        let local = Peer::local(
            "0.0.0.0:52789".parse().unwrap(),
            "alice",
            "#9AB20A".parse().unwrap(),
        );
        let greeting = GreetingMessage::from_peer(&local, false, true);
        assert_eq!(greeting.username, "alice");
        assert_eq!(greeting.color, 0x9AB20A);
        assert!(!greeting.ack);
        assert!(greeting.wants_to_talk);
        assert!(Message::from(greeting).is_control());
    }
}
