//! Courier Runtime
//!
//! Wires the announcement service, the delivery engine and the discussion
//! lifecycle manager around one [`CourierContext`], and drives the periodic
//! sync cycle that makes the engine resumable: every step works purely from
//! persisted state, so re-running a cycle after a crash picks up where the
//! previous process stopped.
//!
//! ```rust,ignore
//! let runtime = RuntimeBuilder::new(owner)
//!     .with_config(CourierConfig::default())
//!     .with_session(session)
//!     .with_store(store)
//!     .with_transport(transport)
//!     .build()?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(async move { runtime.run(shutdown_rx).await });
//! ```

use std::sync::Arc;

use courier_core::{CourierConfig, CourierResult, UserId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::CourierContext;
use crate::managers::{
    AnnouncementReport, AnnouncementService, DiscussionLifecycleManager, FetchOutcome,
    MessageDeliveryEngine, QueueOutcome, RetryReport,
};

// ----------------------------------------------------------------------------
// Sync Report
// ----------------------------------------------------------------------------

/// Outcome of one sync cycle; a failed step leaves its field `None`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub announcements: Option<AnnouncementReport>,
    pub retries: Option<RetryReport>,
    pub keep_alives: Option<usize>,
    pub fetch: Option<FetchOutcome>,
    pub queues: Option<Vec<(UserId, QueueOutcome)>>,
    pub errors: usize,
}

impl SyncReport {
    fn record<T>(&mut self, step: &str, result: CourierResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Sync step '{}' failed: {}", step, e);
                self.errors += 1;
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Courier Runtime
// ----------------------------------------------------------------------------

/// The engine for one local identity
#[derive(Debug)]
pub struct CourierRuntime {
    ctx: CourierContext,
    announcements: Arc<AnnouncementService>,
    delivery: Arc<MessageDeliveryEngine>,
    discussions: DiscussionLifecycleManager,
}

impl CourierRuntime {
    /// Create the services over a shared context
    pub fn new(ctx: CourierContext) -> Self {
        let announcements = Arc::new(AnnouncementService::new(ctx.clone()));
        let delivery = Arc::new(MessageDeliveryEngine::new(ctx.clone()));
        let discussions = DiscussionLifecycleManager::new(ctx.clone(), announcements.clone());
        Self {
            ctx,
            announcements,
            delivery,
            discussions,
        }
    }

    pub fn owner(&self) -> UserId {
        self.ctx.owner
    }

    pub fn config(&self) -> &CourierConfig {
        &self.ctx.config
    }

    pub fn announcements(&self) -> &AnnouncementService {
        &self.announcements
    }

    pub fn delivery(&self) -> &MessageDeliveryEngine {
        &self.delivery
    }

    pub fn discussions(&self) -> &DiscussionLifecycleManager {
        &self.discussions
    }

    /// Run every step once
    ///
    /// Order: incoming announcements, pending announcement retries,
    /// keep-alives, board polling, outbound queues. A failing step is logged
    /// and the remaining steps still run.
    pub async fn sync_once(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let announcements = self.announcements.fetch_and_process().await;
        report.announcements = report.record("fetch announcements", announcements);

        let retries = self.announcements.retry_pending().await;
        report.retries = report.record("retry announcements", retries);

        let keep_alives = self.delivery.send_keep_alives();
        report.keep_alives = report.record("keep-alives", keep_alives);

        let fetch = self.delivery.fetch_messages().await;
        report.fetch = report.record("fetch messages", fetch);

        let queues = self.delivery.process_all_send_queues().await;
        report.queues = report.record("send queues", queues);

        debug!("Sync cycle finished with {} failed steps", report.errors);
        report
    }

    /// Repeat [`sync_once`](Self::sync_once) every `sync.interval` until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CourierResult<()> {
        info!("Courier runtime started for {}", self.ctx.owner);
        let interval = self.ctx.config.sync.interval;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.sync_once().await;

            tokio::select! {
                _ = self.ctx.time.sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Courier runtime stopped for {}", self.ctx.owner);
        Ok(())
    }
}
