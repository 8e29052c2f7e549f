//! Engine events for observers
//!
//! Observers are registered at construction through an [`EventSink`]; there
//! is no global emitter. Events are emitted only after the transaction that
//! produced them has committed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::model::DiscussionStatus;
use crate::types::{MessageId, MessageKey, UserId};

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Notifications emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourierEvent {
    /// A new incoming message was stored
    MessageReceived {
        contact: UserId,
        key: MessageKey,
        message_id: Option<MessageId>,
    },
    /// An outgoing message reached the message board
    MessageSent { contact: UserId, key: MessageKey },
    /// A discussion changed status
    DiscussionUpdated {
        contact: UserId,
        status: DiscussionStatus,
    },
    /// A valid announcement was processed
    AnnouncementReceived { contact: UserId, new_contact: bool },
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Observer registration point
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CourierEvent);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: CourierEvent) {}
}

impl EventSink for mpsc::UnboundedSender<CourierEvent> {
    fn emit(&self, event: CourierEvent) {
        // A dropped receiver only means nobody is listening any more
        if let Err(e) = self.send(event) {
            trace!("Event dropped, receiver closed: {:?}", e.0);
        }
    }
}

/// Receiving half handed to the observer
pub type EventReceiver = mpsc::UnboundedReceiver<CourierEvent>;

/// Create a channel-backed sink and its receiver
pub fn event_channel() -> (Arc<dyn EventSink>, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(sender), receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_events() {
        let (sink, mut receiver) = event_channel();
        let contact = UserId::new([3; 32]);
        sink.emit(CourierEvent::MessageSent {
            contact,
            key: MessageKey::new(1),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(
            event,
            CourierEvent::MessageSent {
                contact,
                key: MessageKey::new(1)
            }
        );
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, receiver) = event_channel();
        drop(receiver);
        sink.emit(CourierEvent::AnnouncementReceived {
            contact: UserId::new([1; 32]),
            new_contact: true,
        });
    }
}
