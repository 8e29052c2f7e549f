//! Runtime Builder API
//!
//! Collects the collaborators of one local identity and produces a
//! [`CourierRuntime`]. The session, store and transport are required; the
//! event sink defaults to [`NoOpEventSink`] and the clock to
//! [`SystemTimeSource`].

use std::sync::Arc;

use courier_core::{
    BulletinTransport, CourierConfig, CourierError, CourierResult, EventSink, NoOpEventSink,
    SessionCapability, Store, SystemTimeSource, TimeSource, UserId,
};
use tracing::info;

use crate::context::CourierContext;
use crate::runtime::CourierRuntime;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for [`CourierRuntime`]
pub struct RuntimeBuilder {
    owner: UserId,
    config: CourierConfig,
    session: Option<Arc<dyn SessionCapability>>,
    store: Option<Arc<dyn Store>>,
    transport: Option<Arc<dyn BulletinTransport>>,
    events: Arc<dyn EventSink>,
    time: Arc<dyn TimeSource>,
}

impl RuntimeBuilder {
    /// Create a new runtime builder for the local identity `owner`
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            config: CourierConfig::default(),
            session: None,
            store: None,
            transport: None,
            events: Arc::new(NoOpEventSink),
            time: Arc::new(SystemTimeSource::new()),
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionCapability>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn BulletinTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register the observer of engine events
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replace the wall clock, e.g. with a manual one in tests
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Validate the configuration and assemble the runtime
    pub fn build(self) -> CourierResult<CourierRuntime> {
        self.config.validate()?;
        let session = self
            .session
            .ok_or_else(|| CourierError::config_error("session capability is required"))?;
        let store = self
            .store
            .ok_or_else(|| CourierError::config_error("store is required"))?;
        let transport = self
            .transport
            .ok_or_else(|| CourierError::config_error("bulletin transport is required"))?;

        info!("Building Courier runtime for {}", self.owner);
        Ok(CourierRuntime::new(CourierContext {
            owner: self.owner,
            session,
            store,
            transport,
            events: self.events,
            time: self.time,
            config: Arc::new(self.config),
        }))
    }
}
