//! Plaintext payload formats
//!
//! Two formats travel inside the encrypted channel:
//! - the message payload handed to `SessionCapability::send_message`
//!   (bincode-encoded [`WirePayload`]);
//! - the announcement user data carried by handshakes (JSON, with a legacy
//!   `name:message` fallback).

use serde::{Deserialize, Serialize};

use crate::errors::CourierResult;
use crate::model::{ForwardOf, Message, MessageType};
use crate::types::{MessageId, UserId};

// ----------------------------------------------------------------------------
// Message Payload
// ----------------------------------------------------------------------------

/// Wire representation of a message body
///
/// Ids are carried as raw byte vectors so a peer sending a malformed id can
/// be detected instead of failing the whole decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum WirePayload {
    Text {
        message_id: Vec<u8>,
        content: String,
    },
    KeepAlive,
    Reply {
        message_id: Vec<u8>,
        original_message_id: Vec<u8>,
        content: String,
    },
    Forward {
        message_id: Vec<u8>,
        original_content: String,
        original_contact_id: Option<UserId>,
        content: String,
    },
}

/// Decoded message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub message_type: MessageType,
    /// `None` for keep-alives and for missing/malformed ids
    pub message_id: Option<MessageId>,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub forward_of: Option<ForwardOf>,
}

impl DecodedPayload {
    /// A non keep-alive payload whose id could not be recovered
    pub fn has_malformed_id(&self) -> bool {
        self.message_type == MessageType::Text && self.message_id.is_none()
    }
}

fn id_bytes(message_id: Option<MessageId>) -> Vec<u8> {
    message_id.map(|id| id.as_bytes().to_vec()).unwrap_or_default()
}

/// Serialize a message body
///
/// Precedence: reply-with-citation, then forward-with-citation, then
/// keep-alive, then plain text.
pub fn encode_message(message: &Message) -> CourierResult<Vec<u8>> {
    let payload = if let Some(reply) = &message.reply_to {
        WirePayload::Reply {
            message_id: id_bytes(message.message_id),
            original_message_id: reply.original_message_id.as_bytes().to_vec(),
            content: message.content.clone(),
        }
    } else if let Some(forward) = &message.forward_of {
        WirePayload::Forward {
            message_id: id_bytes(message.message_id),
            original_content: forward.original_content.clone(),
            original_contact_id: forward.original_contact_id,
            content: message.content.clone(),
        }
    } else if message.is_keep_alive() {
        WirePayload::KeepAlive
    } else {
        WirePayload::Text {
            message_id: id_bytes(message.message_id),
            content: message.content.clone(),
        }
    };
    Ok(bincode::serialize(&payload)?)
}

/// Deserialize a message body
pub fn decode_message(bytes: &[u8]) -> CourierResult<DecodedPayload> {
    let payload: WirePayload = bincode::deserialize(bytes)?;
    let decoded = match payload {
        WirePayload::KeepAlive => DecodedPayload {
            message_type: MessageType::KeepAlive,
            message_id: None,
            content: String::new(),
            reply_to: None,
            forward_of: None,
        },
        WirePayload::Text {
            message_id,
            content,
        } => DecodedPayload {
            message_type: MessageType::Text,
            message_id: MessageId::from_slice(&message_id),
            content,
            reply_to: None,
            forward_of: None,
        },
        WirePayload::Reply {
            message_id,
            original_message_id,
            content,
        } => DecodedPayload {
            message_type: MessageType::Text,
            message_id: MessageId::from_slice(&message_id),
            content,
            reply_to: MessageId::from_slice(&original_message_id),
            forward_of: None,
        },
        WirePayload::Forward {
            message_id,
            original_content,
            original_contact_id,
            content,
        } => DecodedPayload {
            message_type: MessageType::Text,
            message_id: MessageId::from_slice(&message_id),
            content,
            reply_to: None,
            forward_of: Some(ForwardOf {
                original_content,
                original_contact_id,
            }),
        },
    };
    Ok(decoded)
}

// ----------------------------------------------------------------------------
// Announcement User Data
// ----------------------------------------------------------------------------

/// Optional name and greeting attached to a handshake announcement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementUserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AnnouncementUserData {
    pub fn new(username: Option<String>, message: Option<String>) -> Self {
        Self {
            username: non_empty(username),
            message: non_empty(message),
        }
    }

    /// JSON encoding; an empty payload when both fields are absent
    pub fn encode(&self) -> CourierResult<Vec<u8>> {
        if self.username.is_none() && self.message.is_none() {
            return Ok(Vec::new());
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse with precedence JSON object > `name:message` > raw message > absent
    pub fn parse(bytes: &[u8]) -> Self {
        let text = match core::str::from_utf8(bytes) {
            Ok(text) => text.trim(),
            Err(_) => return Self::default(),
        };
        if text.is_empty() {
            return Self::default();
        }

        if text.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str::<AnnouncementUserData>(text) {
                return Self::new(parsed.username, parsed.message);
            }
        }

        if let Some((name, message)) = text.split_once(':') {
            return Self::new(Some(name.to_string()), Some(message.to_string()));
        }

        Self::new(None, Some(text.to_string()))
    }
}
