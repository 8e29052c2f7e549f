//! Property-based tests for the in-memory store
//!
//! These tests verify the composite lookups the engine relies on: ordering of
//! a conversation, status filtering and atomicity of aborted transactions.

use courier_core::{
    CourierError, MemoryStore, Message, MessageDirection, MessageStatus, MessageType, Store,
    StoreExt, Timestamp, UserId,
};
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::WaitingSession),
        Just(MessageStatus::Ready),
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
        Just(MessageStatus::Failed),
    ]
}

/// (timestamp, status, contact index) triples
fn arb_rows() -> impl Strategy<Value = Vec<(u64, MessageStatus, u8)>> {
    prop::collection::vec((0u64..1_000, arb_status(), 0u8..3), 0..40)
}

fn owner() -> UserId {
    UserId::new([0xaa; 32])
}

fn contact(index: u8) -> UserId {
    UserId::new([index + 1; 32])
}

fn populate(store: &MemoryStore, rows: &[(u64, MessageStatus, u8)]) {
    store
        .transact(|tx| {
            for (millis, status, index) in rows {
                let mut message = Message::outgoing(
                    owner(),
                    contact(*index),
                    MessageType::Text,
                    format!("{}", millis),
                    Timestamp::new(*millis),
                );
                message.status = *status;
                tx.insert_message(&message)?;
            }
            Ok(())
        })
        .unwrap();
}

proptest! {
    /// Property: a conversation is returned in (timestamp, key) order
    #[test]
    fn conversation_is_ordered(rows in arb_rows()) {
        let store = MemoryStore::new();
        populate(&store, &rows);

        for index in 0..3u8 {
            let messages = store
                .read(|tx| tx.messages_for_contact(&owner(), &contact(index), &[]))
                .unwrap();
            let expected = rows.iter().filter(|r| r.2 == index).count();
            prop_assert_eq!(messages.len(), expected);
            for pair in messages.windows(2) {
                prop_assert!((pair[0].timestamp, pair[0].key) < (pair[1].timestamp, pair[1].key));
            }
        }
    }

    /// Property: status filters return exactly the matching rows
    #[test]
    fn status_filters_are_exact(rows in arb_rows(), wanted in arb_status()) {
        let store = MemoryStore::new();
        populate(&store, &rows);

        let by_status = store.read(|tx| tx.messages_by_status(&owner(), wanted)).unwrap();
        prop_assert_eq!(by_status.len(), rows.iter().filter(|r| r.1 == wanted).count());

        let outgoing = store
            .read(|tx| tx.messages_by_direction_status(&owner(), MessageDirection::Outgoing, wanted))
            .unwrap();
        prop_assert_eq!(outgoing.len(), by_status.len());

        let incoming = store
            .read(|tx| tx.messages_by_direction_status(&owner(), MessageDirection::Incoming, wanted))
            .unwrap();
        prop_assert!(incoming.is_empty());
    }

    /// Property: an aborted transaction leaves no trace
    #[test]
    fn aborted_transaction_is_atomic(rows in arb_rows()) {
        let store = MemoryStore::new();
        populate(&store, &rows);
        let before = store.message_count();

        let result: Result<(), CourierError> = store.transact(|tx| {
            tx.delete_messages_for_contact(&owner(), &contact(0))?;
            tx.set_announcement_cursor(&owner(), 99)?;
            Err(CourierError::corrupt("abort"))
        });
        prop_assert!(result.is_err());
        prop_assert_eq!(store.message_count(), before);

        let tx = store.begin().unwrap();
        prop_assert_eq!(tx.announcement_cursor(&owner()).unwrap(), None);
    }
}
