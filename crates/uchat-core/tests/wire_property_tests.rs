//! Property-based tests for the wire codec
//!
//! Every message that can be encoded decodes back to itself, and the frame
//! length always covers exactly the bytes after the length prefix.

use proptest::prelude::*;
use uchat_core::protocol::{decode, decode_framed, encode, MAX_CHAT_LEN};
use uchat_core::{ChatMessage, DecodeError, GreetingMessage, Message};

/// Usernames of 0 to 20 bytes, including multi-byte characters
fn arb_username() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_ é]{0,20}")
        .unwrap()
        .prop_filter("at most 20 bytes", |name| name.len() <= 20)
}

fn arb_greeting() -> impl Strategy<Value = Message> {
    (0u32..=0xFF_FFFF, arb_username(), any::<bool>(), any::<bool>()).prop_map(
        |(color, username, ack, wants_to_talk)| {
            Message::Greeting(GreetingMessage::new(color, username, ack, wants_to_talk))
        },
    )
}

/// Finite timestamps only; NaN never compares equal to itself
fn arb_timestamp() -> impl Strategy<Value = f32> {
    prop::num::f32::NORMAL | prop::num::f32::SUBNORMAL | prop::num::f32::ZERO
}

fn arb_chat() -> impl Strategy<Value = Message> {
    (".{0,200}", arb_timestamp())
        .prop_map(|(text, timestamp)| Message::Chat(ChatMessage::new(text, timestamp)))
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![arb_greeting(), arb_chat(), Just(Message::Farewell)]
}

proptest! {
    /// Property: decoding an encoded message yields the original message
    #[test]
    fn roundtrip_preserves_message(message in arb_message()) {
        let frame = encode(&message).expect("generated messages are encodable");
        prop_assert_eq!(decode(&frame).expect("encoded frame decodes"), message);
    }

    /// Property: the length prefix covers the kind tag and payload exactly
    #[test]
    fn length_prefix_matches_body(message in arb_message()) {
        let frame = encode(&message).unwrap();
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(declared, frame.len() - 4);
    }

    /// Property: a body shorter or longer than declared is always rejected
    #[test]
    fn mismatched_length_is_rejected(message in arb_message(), extra in 1usize..8) {
        let frame = encode(&message).unwrap();
        let mut body = frame[4..].to_vec();
        body.extend(std::iter::repeat(0u8).take(extra));

        let length = [frame[0], frame[1], frame[2], frame[3]];
        let result = decode_framed(length, &body);
        let is_length_mismatch = matches!(result, Err(DecodeError::LengthMismatch { .. }));
        prop_assert!(is_length_mismatch);
    }
}

#[test]
fn test_longest_chat_roundtrips() {
    let message = Message::Chat(ChatMessage::new("a".repeat(MAX_CHAT_LEN), 1.5));
    let frame = encode(&message).unwrap();
    assert_eq!(decode(&frame).unwrap(), message);
}
