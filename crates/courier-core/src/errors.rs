//! Error types for the Courier engine
//!
//! This module contains all error types used throughout the engine, including
//! validation errors, transport errors, session errors, storage errors, and the
//! main CourierError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Caller input that can never succeed, returned synchronously and never retried
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid user id: {value}")]
    InvalidUserId { value: String },
    #[error("Required field is empty: {field}")]
    EmptyField { field: &'static str },
    #[error("A contact cannot be the local identity")]
    SelfContact,
}

/// Network-side failures; always transient from the engine's point of view
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Fetch failed: {reason}")]
    FetchFailed { reason: String },
    #[error("Transport unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Failures reported by (or around) the cryptographic session module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session handshake failed with peer {peer}: {reason}")]
    HandshakeFailed { peer: String, reason: String },
    #[error("Session encryption failed for peer {peer}")]
    EncryptionFailed { peer: String },
    #[error("Session not ready for peer {peer}")]
    NotReady { peer: String },
    #[error("Session state could not be persisted: {reason}")]
    PersistFailed { reason: String },
    #[error("Session state lock poisoned")]
    StatePoisoned,
}

/// Failures of the persistent store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {reason}")]
    Backend { reason: String },
    #[error("Corrupt stored data: {reason}")]
    Corrupt { reason: String },
    #[error("Storage lock poisoned")]
    Poisoned,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Courier engine
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised inside transactions when the discussion vanished (e.g. concurrent delete)
    #[error("Discussion not found for contact {contact}")]
    DiscussionNotFound { contact: String },

    #[error("Contact not found: {contact}")]
    ContactNotFound { contact: String },

    #[error("Discussion already exists for contact {contact}")]
    DiscussionExists { contact: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl CourierError {
    /// Create a discussion-not-found error
    pub fn discussion_not_found<T: ToString>(contact: T) -> Self {
        CourierError::DiscussionNotFound {
            contact: contact.to_string(),
        }
    }

    /// Create a contact-not-found error
    pub fn contact_not_found<T: ToString>(contact: T) -> Self {
        CourierError::ContactNotFound {
            contact: contact.to_string(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        CourierError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a storage backend error from any displayable failure
    pub fn storage<E: core::fmt::Display>(err: E) -> Self {
        CourierError::Storage(StorageError::Backend {
            reason: err.to_string(),
        })
    }

    /// Create a corrupt-data error
    pub fn corrupt<T: Into<String>>(reason: T) -> Self {
        CourierError::Storage(StorageError::Corrupt {
            reason: reason.into(),
        })
    }

    /// Create a transport send failure
    pub fn send_failed<T: Into<String>>(reason: T) -> Self {
        CourierError::Transport(TransportError::SendFailed {
            reason: reason.into(),
        })
    }

    /// Create a transport fetch failure
    pub fn fetch_failed<T: Into<String>>(reason: T) -> Self {
        CourierError::Transport(TransportError::FetchFailed {
            reason: reason.into(),
        })
    }

    /// Create a handshake failure
    pub fn handshake_failed<P: ToString, R: Into<String>>(peer: P, reason: R) -> Self {
        CourierError::Session(SessionError::HandshakeFailed {
            peer: peer.to_string(),
            reason: reason.into(),
        })
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CourierError::Transport(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CourierError>;
pub type CourierResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_transient() {
        assert!(CourierError::send_failed("offline").is_transient());
        assert!(CourierError::fetch_failed("timeout").is_transient());
        assert!(!CourierError::discussion_not_found("abc").is_transient());
        assert!(!CourierError::from(ValidationError::SelfContact).is_transient());
        assert!(!CourierError::handshake_failed("abc", "rejected").is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = CourierError::discussion_not_found("peer");
        assert_eq!(err.to_string(), "Discussion not found for contact peer");

        let err: CourierError = ValidationError::EmptyField { field: "content" }.into();
        assert_eq!(
            err.to_string(),
            "Validation error: Required field is empty: content"
        );
    }
}
