//! Centralized Configuration Management
//!
//! Bounded-retry parameters and polling delays live here rather than being
//! hardcoded in the services, so deployments and tests can tune them.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CourierError, CourierResult};

/// Size of a message identifier in bytes
pub const MESSAGE_ID_SIZE: usize = 12;

// ----------------------------------------------------------------------------
// Delivery Configuration
// ----------------------------------------------------------------------------

/// Configuration for the outbound queue and the inbound board polling loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Upper bound on seeker-set reads per fetch run
    pub max_fetch_iterations: u32,
    /// Pause between two polls of the message board
    pub fetch_delay: Duration,
    /// Delay before a READY message whose network send failed is retried
    pub retry_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_fetch_iterations: 30,
            fetch_delay: Duration::from_millis(100),
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl DeliveryConfig {
    /// Zero delays and a small iteration bound
    pub fn testing() -> Self {
        Self {
            max_fetch_iterations: 10,
            fetch_delay: Duration::ZERO,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Slower polling for metered or battery constrained links
    pub fn conservative() -> Self {
        Self {
            max_fetch_iterations: 10,
            fetch_delay: Duration::from_millis(500),
            retry_delay: Duration::from_secs(30),
        }
    }
}

// ----------------------------------------------------------------------------
// Announcement Configuration
// ----------------------------------------------------------------------------

/// Configuration for handshake announcement retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementConfig {
    /// Delay before each retry of a pending announcement
    pub retry_delay: Duration,
    /// Attempts per discussion in one retry pass
    pub max_send_attempts: u32,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            max_send_attempts: 3,
        }
    }
}

impl AnnouncementConfig {
    pub fn testing() -> Self {
        Self {
            retry_delay: Duration::from_millis(10),
            max_send_attempts: 2,
        }
    }

    pub fn conservative() -> Self {
        Self {
            retry_delay: Duration::from_secs(15),
            max_send_attempts: 2,
        }
    }
}

// ----------------------------------------------------------------------------
// Sync Configuration
// ----------------------------------------------------------------------------

/// Configuration for the periodic sync loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Pause between two sync cycles
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

// ----------------------------------------------------------------------------
// Main Configuration
// ----------------------------------------------------------------------------

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    pub delivery: DeliveryConfig,
    pub announcement: AnnouncementConfig,
    pub sync: SyncConfig,
    /// Name advertised to peers inside outgoing announcements
    pub local_username: Option<String>,
}

impl CourierConfig {
    /// Create new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration builder
    pub fn builder() -> CourierConfigBuilder {
        CourierConfigBuilder::new()
    }

    /// Configuration optimized for deterministic tests
    pub fn testing() -> Self {
        Self {
            delivery: DeliveryConfig::testing(),
            announcement: AnnouncementConfig::testing(),
            sync: SyncConfig {
                interval: Duration::from_millis(50),
            },
            local_username: None,
        }
    }

    /// Configuration for constrained environments
    pub fn conservative() -> Self {
        Self {
            delivery: DeliveryConfig::conservative(),
            announcement: AnnouncementConfig::conservative(),
            sync: SyncConfig {
                interval: Duration::from_secs(30),
            },
            local_username: None,
        }
    }

    /// Set the advertised username
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.local_username = Some(username.into());
        self
    }

    /// Reject configurations that would make the bounded loops degenerate
    pub fn validate(&self) -> CourierResult<()> {
        if self.delivery.max_fetch_iterations == 0 {
            return Err(CourierError::config_error(
                "delivery.max_fetch_iterations must be at least 1",
            ));
        }
        if self.announcement.max_send_attempts == 0 {
            return Err(CourierError::config_error(
                "announcement.max_send_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder
// ----------------------------------------------------------------------------

/// Builder for [`CourierConfig`]
#[derive(Debug, Clone, Default)]
pub struct CourierConfigBuilder {
    config: CourierConfig,
}

impl CourierConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.config.delivery = delivery;
        self
    }

    pub fn announcement(mut self, announcement: AnnouncementConfig) -> Self {
        self.config.announcement = announcement;
        self
    }

    pub fn max_fetch_iterations(mut self, iterations: u32) -> Self {
        self.config.delivery.max_fetch_iterations = iterations;
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.config.delivery.fetch_delay = delay;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.delivery.retry_delay = delay;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync.interval = interval;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.local_username = Some(username.into());
        self
    }

    /// Validate and build the final configuration
    pub fn build(self) -> CourierResult<CourierConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
