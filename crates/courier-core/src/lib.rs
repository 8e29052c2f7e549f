//! Courier Core
//!
//! Foundational types and collaborator contracts for the Courier
//! store-and-forward messaging engine: identifiers, the persistent data model,
//! errors, configuration, the payload codec, and the traits through which the
//! engine reaches its cryptographic session module, the network bulletin and
//! the transactional store.
//!
//! The engine itself lives in `courier-runtime`; a durable SQLite store lives
//! in `courier-store`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod events;
pub mod model;
pub mod payload;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    AnnouncementConfig, CourierConfig, CourierConfigBuilder, DeliveryConfig, SyncConfig,
    MESSAGE_ID_SIZE,
};
pub use errors::{
    CourierError, CourierResult, SessionError, StorageError, TransportError, ValidationError,
};
pub use events::{event_channel, CourierEvent, EventReceiver, EventSink, NoOpEventSink};
pub use model::{
    Contact, Discussion, DiscussionDirection, DiscussionStatus, ForwardOf, Message,
    MessageDirection, MessageStatus, MessageType, ReplyTo,
};
pub use payload::{decode_message, encode_message, AnnouncementUserData, DecodedPayload};
pub use session::{
    AnnouncementResult, IncomingBoardMessage, OutgoingBoardMessage, PersistingSession,
    SessionCapability, SessionModule, SessionPersistence, SessionStatus,
};
pub use store::{MemoryStore, Store, StoreExt, StoreTransaction};
pub use transport::{AnnouncementPage, BoardEntry, BulletinItem, BulletinTransport};
pub use types::{
    MessageId, MessageKey, Seeker, SystemTimeSource, TimeSource, Timestamp, UserId,
};
