//! Shared collaborators of one local identity
//!
//! Every service holds a clone of the same [`CourierContext`]; there is no
//! global state.

use std::sync::Arc;

use courier_core::{
    BulletinTransport, CourierConfig, EventSink, SessionCapability, Store, TimeSource, UserId,
};

/// Injected collaborators and configuration for one local identity
#[derive(Clone)]
pub struct CourierContext {
    /// The local identity every stored row belongs to
    pub owner: UserId,
    pub session: Arc<dyn SessionCapability>,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn BulletinTransport>,
    pub events: Arc<dyn EventSink>,
    pub time: Arc<dyn TimeSource>,
    pub config: Arc<CourierConfig>,
}

impl core::fmt::Debug for CourierContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CourierContext")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
