//! Property-based tests for the payload codec and user-data parser
//!
//! These tests verify that decoding never panics on arbitrary input, that
//! message ids survive encoding, and that the user-data parser honors its
//! format precedence.

use courier_core::{
    decode_message, encode_message, AnnouncementUserData, ForwardOf, Message, MessageId,
    MessageType, ReplyTo, Timestamp, UserId,
};
use proptest::prelude::*;

/// Generate arbitrary UserId for property tests
fn arb_user_id() -> impl Strategy<Value = UserId> {
    any::<[u8; 32]>().prop_map(UserId::new)
}

/// Generate printable content without a colon
fn arb_plain_text() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z0-9.,!?][a-zA-Z0-9 .,!?]{0,200}").unwrap()
}

/// Generate a name that survives trimming
fn arb_name() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z][a-zA-Z0-9_]{0,30}").unwrap()
}

proptest! {
    /// Property: decoding arbitrary bytes returns a result instead of panicking
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_message(&bytes);
    }

    /// Property: parsing arbitrary bytes as user data never panics
    #[test]
    fn user_data_parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = AnnouncementUserData::parse(&bytes);
    }

    /// Property: the message id and content of a text message survive encoding
    #[test]
    fn text_message_keeps_id_and_content(
        owner in arb_user_id(),
        peer in arb_user_id(),
        content in arb_plain_text(),
        millis in 0u64..=u64::MAX / 2,
    ) {
        let message = Message::outgoing(owner, peer, MessageType::Text, content.clone(), Timestamp::new(millis));
        let decoded = decode_message(&encode_message(&message).unwrap()).unwrap();
        prop_assert_eq!(decoded.message_id, message.message_id);
        prop_assert_eq!(decoded.content, content);
        prop_assert_eq!(decoded.message_type, MessageType::Text);
    }

    /// Property: a reply citation always wins over a forward citation
    #[test]
    fn reply_precedence_holds(
        content in arb_plain_text(),
        cited in arb_plain_text(),
        with_forward in any::<bool>(),
    ) {
        let original = MessageId::random();
        let mut message = Message::outgoing(
            UserId::new([1; 32]),
            UserId::new([2; 32]),
            MessageType::Text,
            content,
            Timestamp::new(1),
        );
        message.reply_to = Some(ReplyTo { original_message_id: original, original_content: None });
        if with_forward {
            message.forward_of = Some(ForwardOf { original_content: cited, original_contact_id: None });
        }
        let decoded = decode_message(&encode_message(&message).unwrap()).unwrap();
        prop_assert_eq!(decoded.reply_to, Some(original));
        prop_assert!(decoded.forward_of.is_none());
    }

    /// Property: JSON user data is recovered exactly
    #[test]
    fn json_user_data_is_recovered(name in arb_name(), greeting in arb_plain_text()) {
        let data = AnnouncementUserData::new(Some(name), Some(greeting));
        let parsed = AnnouncementUserData::parse(&data.encode().unwrap());
        prop_assert_eq!(parsed, data);
    }

    /// Property: the legacy colon format splits on the first colon
    #[test]
    fn legacy_user_data_splits_on_first_colon(name in arb_name(), greeting in arb_plain_text()) {
        let raw = format!("{}:{}", name, greeting);
        let parsed = AnnouncementUserData::parse(raw.as_bytes());
        prop_assert_eq!(parsed.username, Some(name));
        prop_assert_eq!(parsed.message, Some(greeting.trim().to_string()).filter(|m| !m.is_empty()));
    }

    /// Property: text without a colon is treated as a message only
    #[test]
    fn raw_user_data_is_message_only(greeting in arb_plain_text()) {
        let parsed = AnnouncementUserData::parse(greeting.as_bytes());
        prop_assert!(parsed.username.is_none());
        prop_assert_eq!(parsed.message, Some(greeting.trim().to_string()));
    }
}
