//! Courier Runtime Engine
//!
//! This crate contains the engine that sits between an opaque cryptographic
//! session module and a transactional store:
//! - `AnnouncementService`: session establishment and renewal over the bulletin
//! - `MessageDeliveryEngine`: the outbound queue and inbound board polling
//! - `DiscussionLifecycleManager`: start, accept, renew and delete
//! - `CourierRuntime`: the periodic sync cycle tying them together
//!
//! `courier-core` provides the data model and the collaborator contracts.

pub mod builder;
pub mod context;
pub mod guard;
pub mod managers;
mod runtime;

pub use builder::RuntimeBuilder;
pub use context::CourierContext;
pub use managers::*;
pub use runtime::*;

// Re-export core types for convenience
pub use courier_core::{
    event_channel, CourierConfig, CourierError, CourierEvent, CourierResult, Discussion,
    DiscussionStatus, EventReceiver, Message, MessageKey, MessageStatus, UserId,
};
