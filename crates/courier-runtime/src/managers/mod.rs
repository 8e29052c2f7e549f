//! Stateful services of the Courier runtime
//!
//! Each service holds a clone of the shared [`CourierContext`](crate::CourierContext)
//! and orchestrates one part of the protocol.

pub mod announcement;
pub mod delivery;
pub mod discussion;

pub use announcement::{
    status_from_session, AnnouncementReport, AnnouncementService, RetryReport, NEW_REQUEST_PREFIX,
};
pub use delivery::{
    DecryptedMessage, FetchOutcome, FetchReport, MessageDeliveryEngine, MessageDraft,
    QueueOutcome, QueueReport, StoreReport,
};
pub use discussion::{DeleteReport, DiscussionLifecycleManager};
