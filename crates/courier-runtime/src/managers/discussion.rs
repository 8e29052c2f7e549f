//! Discussion lifecycle
//!
//! `Pending` (received, not yet accepted) moves to `Active` once both
//! handshake halves are exchanged. `Broken` (cryptographic desync) and
//! `SendFailed` (announcement never reached the network) are left only through
//! `renew` or a successful announcement retry.

use std::sync::Arc;

use courier_core::{
    Contact, CourierError, CourierResult, Discussion, DiscussionDirection, MessageDirection,
    MessageStatus, StoreExt, UserId, ValidationError,
};
use tracing::{info, warn};

use crate::context::CourierContext;
use crate::managers::announcement::AnnouncementService;

/// Rows removed by a contact deletion
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteReport {
    pub messages: usize,
    pub discussion: bool,
    pub contact: bool,
}

// ----------------------------------------------------------------------------
// Discussion Lifecycle Manager
// ----------------------------------------------------------------------------

/// Owns discussion state transitions
#[derive(Debug, Clone)]
pub struct DiscussionLifecycleManager {
    ctx: CourierContext,
    announcements: Arc<AnnouncementService>,
}

impl DiscussionLifecycleManager {
    pub fn new(ctx: CourierContext, announcements: Arc<AnnouncementService>) -> Self {
        Self { ctx, announcements }
    }

    /// Register a peer so a discussion can be started with it
    pub fn add_contact(
        &self,
        user_id: &UserId,
        name: &str,
        public_key: Vec<u8>,
    ) -> CourierResult<Contact> {
        let owner = self.ctx.owner;
        if *user_id == owner {
            return Err(ValidationError::SelfContact.into());
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyField { field: "name" }.into());
        }
        if public_key.is_empty() {
            return Err(ValidationError::EmptyField { field: "public_key" }.into());
        }

        let contact = Contact::new(owner, *user_id, name, public_key, self.ctx.time.now());
        self.ctx.store.transact(|tx| tx.put_contact(&contact))?;
        Ok(contact)
    }

    fn require_contact(&self, contact: &UserId) -> CourierResult<Contact> {
        let owner = self.ctx.owner;
        self.ctx
            .store
            .read(|tx| tx.contact(&owner, contact))?
            .ok_or_else(|| CourierError::contact_not_found(contact))
    }

    fn require_discussion(&self, contact: &UserId) -> CourierResult<Discussion> {
        self.discussion(contact)?
            .ok_or_else(|| CourierError::discussion_not_found(contact))
    }

    /// Send an announcement, tolerating network failure
    async fn publish(&self, contact: &UserId, announcement: &[u8]) -> CourierResult<()> {
        match self.announcements.send_announcement(contact, announcement).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                warn!("Announcement for {} left pending: {}", contact, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Start an initiated discussion with an existing contact
    pub async fn start(&self, contact: &UserId, message: Option<&str>) -> CourierResult<Discussion> {
        let contact = self.require_contact(contact)?;
        if self.discussion(&contact.user_id)?.is_some() {
            return Err(CourierError::DiscussionExists {
                contact: contact.user_id.to_string(),
            });
        }

        let announcement =
            self.announcements
                .establish(&contact, DiscussionDirection::Initiated, message)?;
        self.publish(&contact.user_id, &announcement).await?;

        info!("Started discussion with {}", contact.user_id);
        self.require_discussion(&contact.user_id)
    }

    /// Accept a received discussion by answering its announcement
    pub async fn accept(&self, contact: &UserId, message: Option<&str>) -> CourierResult<Discussion> {
        let discussion = self.require_discussion(contact)?;
        if discussion.we_accepted {
            return Ok(discussion);
        }
        let contact = self.require_contact(contact)?;

        let announcement =
            self.announcements
                .establish(&contact, DiscussionDirection::Received, message)?;
        self.publish(&contact.user_id, &announcement).await?;

        info!("Accepted discussion with {}", contact.user_id);
        self.require_discussion(&contact.user_id)
    }

    /// Re-establish the session with a new announcement
    ///
    /// `we_accepted` is never reset. Outgoing messages that were encrypted for
    /// the old session (`Ready`) or failed on it go back to `WaitingSession`.
    pub async fn renew(&self, contact: &UserId) -> CourierResult<Discussion> {
        let owner = self.ctx.owner;
        let discussion = self.require_discussion(contact)?;
        let contact = self.require_contact(contact)?;

        let announcement = self
            .announcements
            .establish(&contact, discussion.direction, None)?;

        let requeued = self.ctx.store.transact(|tx| {
            let stale = tx.messages_for_contact(
                &owner,
                &contact.user_id,
                &[MessageStatus::Ready, MessageStatus::Failed],
            )?;
            let mut requeued = 0;
            for mut message in stale {
                if message.direction != MessageDirection::Outgoing {
                    continue;
                }
                message.status = MessageStatus::WaitingSession;
                message.seeker = None;
                message.encrypted_message = None;
                message.when_to_send = None;
                tx.update_message(&message)?;
                requeued += 1;
            }
            Ok(requeued)
        })?;

        self.publish(&contact.user_id, &announcement).await?;

        info!(
            "Renewed session with {} ({} messages re-queued)",
            contact.user_id, requeued
        );
        self.require_discussion(&contact.user_id)
    }

    /// Delete the contact, its discussion and all its messages, then discard the session
    ///
    /// Irreversible. `peer_discard` is called exactly once, even when no rows existed.
    pub fn delete(&self, contact: &UserId) -> CourierResult<DeleteReport> {
        let owner = self.ctx.owner;
        let report = self.ctx.store.transact(|tx| {
            Ok(DeleteReport {
                messages: tx.delete_messages_for_contact(&owner, contact)?,
                discussion: tx.delete_discussion(&owner, contact)?,
                contact: tx.delete_contact(&owner, contact)?,
            })
        })?;

        self.ctx.session.peer_discard(contact)?;
        info!(
            "Deleted contact {} ({} messages, discussion: {})",
            contact, report.messages, report.discussion
        );
        Ok(report)
    }

    /// Discussions of the local identity, most recent activity first
    pub fn list_discussions(&self) -> CourierResult<Vec<Discussion>> {
        let owner = self.ctx.owner;
        let mut discussions = self.ctx.store.read(|tx| tx.discussions(&owner))?;
        discussions.sort_by(|a, b| {
            let recent = |d: &Discussion| d.last_message_timestamp.unwrap_or(d.updated_at).max(d.updated_at);
            recent(b).cmp(&recent(a))
        });
        Ok(discussions)
    }

    pub fn discussion(&self, contact: &UserId) -> CourierResult<Option<Discussion>> {
        let owner = self.ctx.owner;
        self.ctx.store.read(|tx| tx.discussion(&owner, contact))
    }

    pub fn contacts(&self) -> CourierResult<Vec<Contact>> {
        let owner = self.ctx.owner;
        self.ctx.store.read(|tx| tx.contacts(&owner))
    }
}
