//! Bulletin transport abstraction
//!
//! The network side of the protocol: a message board addressed by seekers and
//! an append-only announcement bulletin addressed by counters. The engine
//! imposes no timeouts on these calls; that is the transport's business.

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::Seeker;

// ----------------------------------------------------------------------------
// Wire Items
// ----------------------------------------------------------------------------

/// Ciphertext stored at one seeker slot of the message board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEntry {
    pub seeker: Seeker,
    pub ciphertext: Vec<u8>,
}

/// One announcement on the bulletin, with its position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinItem {
    pub counter: u64,
    pub data: Vec<u8>,
}

/// A page of announcements following a cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncementPage {
    pub items: Vec<BulletinItem>,
    /// Cursor to resume from; `None` when the page is empty
    pub next_cursor: Option<u64>,
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Network collaborator for the message board and announcement bulletin
#[async_trait]
pub trait BulletinTransport: Send + Sync {
    /// Read whatever ciphertexts exist at the given seekers
    async fn fetch_messages(&self, seekers: &[Seeker]) -> Result<Vec<BoardEntry>>;

    /// Publish a ciphertext at its seeker
    async fn send_message(&self, entry: &BoardEntry) -> Result<()>;

    /// Publish an announcement, returning its bulletin counter
    async fn send_announcement(&self, announcement: &[u8]) -> Result<u64>;

    /// Announcements strictly after `cursor` (from the start when `None`)
    async fn fetch_announcements(&self, cursor: Option<u64>) -> Result<AnnouncementPage>;
}
