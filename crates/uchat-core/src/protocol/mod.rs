//! UChat Protocol Module
//!
//! - `message`: the three message kinds exchanged between peers
//! - `wire`: binary encoding, decoding, and stream framing

pub mod message;
pub mod wire;

pub use message::{
    ChatMessage, GreetingMessage, Message, MessageKind, MAX_CHAT_LEN, MAX_USERNAME_LEN,
};
pub use wire::{decode, decode_framed, encode, read_frame, FrameError, MAX_FRAME_LEN};
