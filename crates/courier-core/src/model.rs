//! Persistent entities: contacts, discussions and messages
//!
//! These are the rows the engine keeps in the store. Discussions carry a
//! denormalized cache of the conversation (unread count, last message) that
//! is only ever mutated in the same transaction as the message rows it mirrors.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CourierError;
use crate::types::{MessageId, MessageKey, Seeker, Timestamp, UserId};

// ----------------------------------------------------------------------------
// String Encoded Enums
// ----------------------------------------------------------------------------

/// Declares a fieldless enum with stable lowercase names for storage columns
macro_rules! stored_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Stable name used in storage
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CourierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CourierError::corrupt(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

stored_enum! {
    /// Which side started the discussion
    pub enum DiscussionDirection {
        Initiated => "initiated",
        Received => "received",
    }
}

stored_enum! {
    /// Lifecycle state of a discussion
    pub enum DiscussionStatus {
        /// Handshake in progress (received and not accepted, or awaiting the peer)
        Pending => "pending",
        /// Both handshake halves exchanged
        Active => "active",
        /// Cryptographic desync; requires an explicit renew
        Broken => "broken",
        /// The handshake announcement could not reach the network
        SendFailed => "send_failed",
    }
}

stored_enum! {
    /// Kind of message content
    pub enum MessageType {
        Text => "text",
        KeepAlive => "keep_alive",
    }
}

stored_enum! {
    pub enum MessageDirection {
        Incoming => "incoming",
        Outgoing => "outgoing",
    }
}

stored_enum! {
    /// Delivery state of a message
    ///
    /// Moves forward only (`WaitingSession → Ready → Sent → Delivered → Read`),
    /// except for the explicit resend reset back to `WaitingSession`.
    pub enum MessageStatus {
        WaitingSession => "waiting_session",
        Ready => "ready",
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
        Failed => "failed",
    }
}

impl MessageStatus {
    /// Position on the happy path; `Failed` sits outside of it
    fn rank(&self) -> Option<u8> {
        match self {
            MessageStatus::WaitingSession => Some(0),
            MessageStatus::Ready => Some(1),
            MessageStatus::Sent => Some(2),
            MessageStatus::Delivered => Some(3),
            MessageStatus::Read => Some(4),
            MessageStatus::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic
    ///
    /// `Failed` can be entered from any pre-delivery state; leaving it is only
    /// possible through a resend reset, which is not a forward transition.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target >= current,
            (Some(current), None) => current < 2,
            (None, _) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Contact
// ----------------------------------------------------------------------------

/// A known peer of the local identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub owner_user_id: UserId,
    pub user_id: UserId,
    pub name: String,
    pub public_key: Vec<u8>,
    pub created_at: Timestamp,
}

impl Contact {
    pub fn new(
        owner_user_id: UserId,
        user_id: UserId,
        name: impl Into<String>,
        public_key: Vec<u8>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            owner_user_id,
            user_id,
            name: name.into(),
            public_key,
            created_at,
        }
    }
}

// ----------------------------------------------------------------------------
// Discussion
// ----------------------------------------------------------------------------

/// Conversation state with one contact, unique per (owner, contact)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    pub owner_user_id: UserId,
    pub contact_user_id: UserId,
    pub we_accepted: bool,
    pub direction: DiscussionDirection,
    pub status: DiscussionStatus,
    /// Handshake bytes whose network send has not yet succeeded
    pub pending_announcement: Option<Vec<u8>>,
    pub last_announcement_message: Option<String>,
    pub unread_count: u32,
    pub last_message_id: Option<MessageId>,
    pub last_message_content: Option<String>,
    pub last_message_timestamp: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Discussion {
    /// A fresh discussion with an empty conversation cache
    pub fn new(
        owner_user_id: UserId,
        contact_user_id: UserId,
        direction: DiscussionDirection,
        we_accepted: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            owner_user_id,
            contact_user_id,
            we_accepted,
            direction,
            status: DiscussionStatus::Pending,
            pending_announcement: None,
            last_announcement_message: None,
            unread_count: 0,
            last_message_id: None,
            last_message_content: None,
            last_message_timestamp: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the denormalized last-message fields from `message`
    pub fn record_last_message(&mut self, message: &Message) {
        let newer = self
            .last_message_timestamp
            .map_or(true, |last| message.timestamp >= last);
        if newer {
            self.last_message_id = message.message_id;
            self.last_message_content = Some(message.content.clone());
            self.last_message_timestamp = Some(message.timestamp);
        }
    }

    /// Whether an announcement still has to reach the network
    pub fn needs_announcement_retry(&self) -> bool {
        self.pending_announcement.is_some() || self.status == DiscussionStatus::SendFailed
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// Citation of an earlier message this one replies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub original_message_id: MessageId,
    /// Content of the cited message, when it could be resolved locally
    pub original_content: Option<String>,
}

/// Citation of content forwarded from another conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOf {
    pub original_content: String,
    pub original_contact_id: Option<UserId>,
}

/// A stored message, incoming or outgoing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Local row key, assigned on insert
    pub key: Option<MessageKey>,
    pub owner_user_id: UserId,
    pub contact_user_id: UserId,
    /// Absent for keep-alives and for incoming messages with a malformed id
    pub message_id: Option<MessageId>,
    pub content: String,
    /// Cached wire payload, so retries never re-serialize
    pub serialized_content: Option<Vec<u8>>,
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub seeker: Option<Seeker>,
    /// Cached ciphertext, reused verbatim for network retries
    pub encrypted_message: Option<Vec<u8>>,
    pub when_to_send: Option<Timestamp>,
    pub timestamp: Timestamp,
    pub reply_to: Option<ReplyTo>,
    pub forward_of: Option<ForwardOf>,
}

impl Message {
    /// A new outgoing message waiting for the session
    pub fn outgoing(
        owner_user_id: UserId,
        contact_user_id: UserId,
        message_type: MessageType,
        content: String,
        timestamp: Timestamp,
    ) -> Self {
        let message_id = match message_type {
            MessageType::KeepAlive => None,
            MessageType::Text => Some(MessageId::random()),
        };
        Self {
            key: None,
            owner_user_id,
            contact_user_id,
            message_id,
            content,
            serialized_content: None,
            message_type,
            direction: MessageDirection::Outgoing,
            status: MessageStatus::WaitingSession,
            seeker: None,
            encrypted_message: None,
            when_to_send: None,
            timestamp,
            reply_to: None,
            forward_of: None,
        }
    }

    /// Local key, failing if the message was never stored
    pub fn require_key(&self) -> Result<MessageKey, CourierError> {
        self.key
            .ok_or_else(|| CourierError::corrupt("message has no local key"))
    }

    pub fn is_keep_alive(&self) -> bool {
        self.message_type == MessageType::KeepAlive
    }
}
