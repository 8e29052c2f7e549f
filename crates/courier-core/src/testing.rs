//! Deterministic test utilities
//!
//! Enabled through the `testing` feature so downstream crates can drive the
//! engine's retry and polling delays without real timers.

use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Manual Time Source
// ----------------------------------------------------------------------------

/// Virtual clock; `sleep` advances time instantly and yields to the scheduler
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    current_time: Arc<AtomicU64>,
    slept: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Create a manual time source starting at time 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manual time source starting at a specific time
    pub fn new_at(start_millis: u64) -> Self {
        let source = Self::default();
        source.set_time(start_millis);
        source
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }

    /// Total virtual time spent in `sleep`
    pub fn total_slept(&self) -> Duration {
        Duration::from_millis(self.slept.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        self.current_time.fetch_add(millis, Ordering::SeqCst);
        self.slept.fetch_add(millis, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_advances_virtual_time() {
        let time = ManualTimeSource::new_at(1_000);
        time.sleep(Duration::from_secs(3)).await;
        assert_eq!(time.now(), Timestamp::new(4_000));
        assert_eq!(time.total_slept(), Duration::from_secs(3));

        time.advance(500);
        assert_eq!(time.now().as_millis(), 4_500);
    }
}
