//! Wire format for UChat messages
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! [u32 frame_length][u8 kind][payload]
//!
//! Greeting: [u32 color][u8 ack][u8 wants_to_talk][u8 name_len][name bytes]
//! Chat:     [u16 text_len][f32 unix_seconds][text bytes]
//! Farewell: (empty)
//! ```
//!
//! `frame_length` counts the kind byte and the payload, never itself.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{DecodeError, EncodeError, NetworkError};
use crate::protocol::message::{
    ChatMessage, GreetingMessage, Message, MessageKind, MAX_CHAT_LEN, MAX_USERNAME_LEN,
};
use crate::types::MAX_COLOR;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Fixed part of a greeting payload: color, ack, wants_to_talk, name length
const GREETING_FIXED_SIZE: usize = 4 + 1 + 1 + 1;

/// Fixed part of a chat payload: text length, timestamp
const CHAT_FIXED_SIZE: usize = 2 + 4;

/// Largest legal frame body: a chat carrying the maximum text
pub const MAX_FRAME_LEN: usize = 1 + CHAT_FIXED_SIZE + MAX_CHAT_LEN;

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode a message into a length-prefixed frame
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let mut body = Vec::with_capacity(encoded_body_len(message));
    body.push(message.kind().as_u8());

    match message {
        Message::Greeting(greeting) => {
            let name = greeting.username.as_bytes();
            if name.len() > MAX_USERNAME_LEN {
                return Err(EncodeError::UsernameTooLong(name.len()));
            }
            if greeting.color > MAX_COLOR {
                return Err(EncodeError::ColorOutOfRange(greeting.color));
            }
            body.extend_from_slice(&greeting.color.to_be_bytes());
            body.push(greeting.ack as u8);
            body.push(greeting.wants_to_talk as u8);
            body.push(name.len() as u8);
            body.extend_from_slice(name);
        }
        Message::Chat(chat) => {
            let text = chat.text.as_bytes();
            if text.len() > MAX_CHAT_LEN {
                return Err(EncodeError::TextTooLong(text.len()));
            }
            body.extend_from_slice(&(text.len() as u16).to_be_bytes());
            body.extend_from_slice(&chat.timestamp.to_be_bytes());
            body.extend_from_slice(text);
        }
        Message::Farewell => {}
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn encoded_body_len(message: &Message) -> usize {
    1 + match message {
        Message::Greeting(greeting) => GREETING_FIXED_SIZE + greeting.username.len(),
        Message::Chat(chat) => CHAT_FIXED_SIZE + chat.text.len(),
        Message::Farewell => 0,
    }
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Decode a frame given its length prefix and body separately
pub fn decode_framed(
    length_bytes: [u8; LENGTH_PREFIX_SIZE],
    body: &[u8],
) -> Result<Message, DecodeError> {
    let declared = u32::from_be_bytes(length_bytes) as usize;
    if declared != body.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    decode_body(body)
}

/// Decode a complete frame, length prefix included
pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(DecodeError::LengthMismatch {
            declared: 0,
            actual: frame.len(),
        });
    }
    let (prefix, body) = frame.split_at(LENGTH_PREFIX_SIZE);
    let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
    length_bytes.copy_from_slice(prefix);
    decode_framed(length_bytes, body)
}

/// Decode a frame body (kind tag + payload)
pub fn decode_body(body: &[u8]) -> Result<Message, DecodeError> {
    let (&tag, payload) = body.split_first().ok_or(DecodeError::EmptyFrame)?;
    let kind = MessageKind::try_from(tag).map_err(DecodeError::UnknownKind)?;

    let mut reader = PayloadReader::new(kind, payload);
    let message = match kind {
        MessageKind::Greeting => {
            let color = u32::from_be_bytes(reader.array()?);
            let ack = reader.bool()?;
            let wants_to_talk = reader.bool()?;
            let name_len = reader.u8()? as usize;
            if name_len > MAX_USERNAME_LEN {
                return Err(DecodeError::UsernameTooLong(name_len));
            }
            let username = reader.utf8(name_len)?;
            Message::Greeting(GreetingMessage {
                color,
                username,
                ack,
                wants_to_talk,
            })
        }
        MessageKind::Chat => {
            let text_len = u16::from_be_bytes(reader.array()?) as usize;
            let timestamp = f32::from_be_bytes(reader.array()?);
            let text = reader.utf8(text_len)?;
            Message::Chat(ChatMessage { timestamp, text })
        }
        MessageKind::Farewell => Message::Farewell,
    };

    reader.finish()?;
    Ok(message)
}

/// Cursor over a payload that reports short reads as [`DecodeError::Truncated`]
struct PayloadReader<'a> {
    kind: MessageKind,
    bytes: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn new(kind: MessageKind, bytes: &'a [u8]) -> Self {
        Self { kind, bytes }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        if self.bytes.len() < needed {
            return Err(DecodeError::Truncated {
                kind: self.kind,
                needed,
                available: self.bytes.len(),
            });
        }
        let (head, rest) = self.bytes.split_at(needed);
        self.bytes = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    fn utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let kind = self.kind;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(kind))
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                kind: self.kind,
                extra: self.bytes.len(),
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Stream Framing
// ----------------------------------------------------------------------------

/// Failure while reading one frame from a stream
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame was read in full but its body is malformed. The stream is
    /// still aligned on a frame boundary.
    #[error(transparent)]
    Malformed(#[from] DecodeError),
    /// The stream is closed or unusable.
    #[error(transparent)]
    Broken(#[from] NetworkError),
}

impl FrameError {
    /// Whether the stream must be abandoned
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameError::Broken(_))
    }
}

/// Read exactly one frame from `reader`.
///
/// Waits indefinitely for the length prefix; once it arrives the body must
/// follow within `body_timeout`.
pub async fn read_frame<R>(reader: &mut R, body_timeout: Duration) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
    reader
        .read_exact(&mut length_bytes)
        .await
        .map_err(receive_error)?;

    let declared = u32::from_be_bytes(length_bytes) as usize;
    if declared > MAX_FRAME_LEN {
        return Err(NetworkError::Desynchronized(DecodeError::FrameTooLarge {
            declared,
            max: MAX_FRAME_LEN,
        })
        .into());
    }

    let mut body = vec![0u8; declared];
    match tokio::time::timeout(body_timeout, reader.read_exact(&mut body)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => return Err(receive_error(err).into()),
        Err(_) => {
            return Err(NetworkError::TimedOut {
                operation: "reading a frame body",
                duration: body_timeout,
            }
            .into())
        }
    }

    Ok(decode_framed(length_bytes, &body)?)
}

fn receive_error(err: std::io::Error) -> NetworkError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        NetworkError::Closed
    } else {
        NetworkError::Receive(err)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
