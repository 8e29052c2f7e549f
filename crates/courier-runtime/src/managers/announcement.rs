//! Session establishment through the announcement bulletin
//!
//! Outgoing announcements are produced by the session module, recorded on the
//! discussion as `pending_announcement` and cleared only once the network has
//! accepted them. Incoming announcements are read from a per-owner cursor that
//! advances in the same transaction as the contact and discussion upserts, so
//! replaying a bulletin position is a no-op.

use courier_core::{
    AnnouncementResult, AnnouncementUserData, BulletinItem, Contact, CourierError, CourierEvent,
    CourierResult, Discussion, DiscussionDirection, DiscussionStatus, SessionStatus, StoreExt,
    StoreTransaction, Timestamp, UserId, ValidationError,
};
use tracing::{debug, error, info, warn};

use crate::context::CourierContext;

/// Prefix of names given to contacts that announced without a username
pub const NEW_REQUEST_PREFIX: &str = "New Request ";

/// Discussion status implied by the session module's view of a peer
pub fn status_from_session(status: SessionStatus) -> DiscussionStatus {
    match status {
        SessionStatus::Active => DiscussionStatus::Active,
        _ => DiscussionStatus::Pending,
    }
}

// ----------------------------------------------------------------------------
// Reports
// ----------------------------------------------------------------------------

/// Summary of one `fetch_and_process` run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnnouncementReport {
    /// Bulletin items read from the network
    pub fetched: usize,
    /// Items that produced a contact/discussion upsert
    pub processed: usize,
    pub new_contacts: usize,
    /// Items the session module rejected (invalid, stale or not for us)
    pub ignored: usize,
    /// Items at or below the stored cursor
    pub replayed: usize,
    /// Automatic answers sent to peers renewing an accepted discussion
    pub replies: usize,
}

/// Summary of one `retry_pending` run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    pub discussions: usize,
    pub attempts: usize,
    pub succeeded: usize,
}

struct ProcessedAnnouncement {
    contact: UserId,
    new_contact: bool,
    status: DiscussionStatus,
    needs_reply: bool,
}

enum ItemOutcome {
    Processed(ProcessedAnnouncement),
    Ignored,
    Replayed,
}

// ----------------------------------------------------------------------------
// Announcement Service
// ----------------------------------------------------------------------------

/// Drives session establishment and renewal
#[derive(Debug, Clone)]
pub struct AnnouncementService {
    ctx: CourierContext,
}

impl AnnouncementService {
    pub fn new(ctx: CourierContext) -> Self {
        Self { ctx }
    }

    fn user_data(&self, message: Option<&str>) -> CourierResult<Vec<u8>> {
        AnnouncementUserData::new(
            self.ctx.config.local_username.clone(),
            message.map(str::to_string),
        )
        .encode()
    }

    /// Produce an announcement for `contact` and record it as pending
    ///
    /// Upserts the contact and the discussion with `we_accepted = true`. An
    /// existing discussion keeps its direction; `direction` applies to new ones.
    pub fn establish(
        &self,
        contact: &Contact,
        direction: DiscussionDirection,
        message: Option<&str>,
    ) -> CourierResult<Vec<u8>> {
        let owner = self.ctx.owner;
        if contact.user_id == owner {
            return Err(ValidationError::SelfContact.into());
        }

        let user_data = self.user_data(message)?;
        // The session adapter persists the module state before returning
        let announcement = match self
            .ctx
            .session
            .establish_outgoing_session(&contact.public_key, &user_data)
        {
            Ok(announcement) => announcement,
            Err(e) => {
                error!("Session handshake with {} failed: {}", contact.user_id, e);
                self.mark_broken(&contact.user_id)?;
                return Err(e);
            }
        };
        let status = status_from_session(self.ctx.session.peer_session_status(&contact.user_id));
        let now = self.ctx.time.now();

        self.ctx.store.transact(|tx| {
            if tx.contact(&owner, &contact.user_id)?.is_none() {
                tx.put_contact(contact)?;
            }
            let mut discussion = tx
                .discussion(&owner, &contact.user_id)?
                .unwrap_or_else(|| Discussion::new(owner, contact.user_id, direction, true, now));
            discussion.we_accepted = true;
            discussion.pending_announcement = Some(announcement.clone());
            discussion.status = status;
            discussion.updated_at = now;
            tx.put_discussion(&discussion)
        })?;

        info!(
            "Established outgoing session with {} ({} announcement bytes pending)",
            contact.user_id,
            announcement.len()
        );
        Ok(announcement)
    }

    /// Mark an existing discussion `Broken`; a missing one is left alone
    fn mark_broken(&self, contact: &UserId) -> CourierResult<()> {
        let owner = self.ctx.owner;
        let now = self.ctx.time.now();
        let broken = self.ctx.store.transact(|tx| {
            let Some(mut discussion) = tx.discussion(&owner, contact)? else {
                return Ok(false);
            };
            discussion.status = DiscussionStatus::Broken;
            discussion.updated_at = now;
            tx.put_discussion(&discussion)?;
            Ok(true)
        })?;
        if broken {
            self.ctx.events.emit(CourierEvent::DiscussionUpdated {
                contact: *contact,
                status: DiscussionStatus::Broken,
            });
        }
        Ok(())
    }

    /// Publish an announcement for `contact`
    ///
    /// On success the pending announcement is cleared (if it is still the one
    /// sent) and the status follows the session. On failure the announcement
    /// stays pending, the discussion becomes `SendFailed` and the transport
    /// error is returned.
    pub async fn send_announcement(&self, contact: &UserId, announcement: &[u8]) -> CourierResult<u64> {
        let owner = self.ctx.owner;
        let sent = self.ctx.transport.send_announcement(announcement).await;
        let now = self.ctx.time.now();

        match sent {
            Ok(counter) => {
                let status = status_from_session(self.ctx.session.peer_session_status(contact));
                let updated = self.ctx.store.transact(|tx| {
                    let Some(mut discussion) = tx.discussion(&owner, contact)? else {
                        return Ok(false);
                    };
                    if discussion.pending_announcement.as_deref() == Some(announcement) {
                        discussion.pending_announcement = None;
                    }
                    discussion.status = status;
                    discussion.updated_at = now;
                    tx.put_discussion(&discussion)?;
                    Ok(true)
                })?;

                debug!("Announcement for {} published at counter {}", contact, counter);
                if updated {
                    self.ctx.events.emit(CourierEvent::DiscussionUpdated {
                        contact: *contact,
                        status,
                    });
                }
                Ok(counter)
            }
            Err(e) => {
                warn!("Failed to publish announcement for {}: {}", contact, e);
                let updated = self.ctx.store.transact(|tx| {
                    let Some(mut discussion) = tx.discussion(&owner, contact)? else {
                        return Ok(false);
                    };
                    discussion.status = DiscussionStatus::SendFailed;
                    discussion.updated_at = now;
                    tx.put_discussion(&discussion)?;
                    Ok(true)
                })?;
                if updated {
                    self.ctx.events.emit(CourierEvent::DiscussionUpdated {
                        contact: *contact,
                        status: DiscussionStatus::SendFailed,
                    });
                }
                Err(e)
            }
        }
    }

    /// Pull bulletin items after the stored cursor and process each one
    pub async fn fetch_and_process(&self) -> CourierResult<AnnouncementReport> {
        let owner = self.ctx.owner;
        let mut report = AnnouncementReport::default();
        let mut cursor = self.ctx.store.read(|tx| tx.announcement_cursor(&owner))?;
        let mut replies = Vec::new();

        loop {
            let page = self.ctx.transport.fetch_announcements(cursor).await?;
            if page.items.is_empty() {
                break;
            }
            report.fetched += page.items.len();

            for item in &page.items {
                match self.process_item(item)? {
                    ItemOutcome::Processed(processed) => {
                        report.processed += 1;
                        if processed.new_contact {
                            report.new_contacts += 1;
                        }
                        self.ctx.events.emit(CourierEvent::AnnouncementReceived {
                            contact: processed.contact,
                            new_contact: processed.new_contact,
                        });
                        self.ctx.events.emit(CourierEvent::DiscussionUpdated {
                            contact: processed.contact,
                            status: processed.status,
                        });
                        if processed.needs_reply {
                            replies.push(processed.contact);
                        }
                    }
                    ItemOutcome::Ignored => report.ignored += 1,
                    ItemOutcome::Replayed => report.replayed += 1,
                }
            }

            let last = page.items.iter().map(|item| item.counter).max();
            let next = page.next_cursor.max(last);
            if next <= cursor {
                break;
            }
            cursor = next;
        }

        if let Some(position) = cursor {
            self.ctx.store.transact(|tx| {
                if tx.announcement_cursor(&owner)? < Some(position) {
                    tx.set_announcement_cursor(&owner, position)?;
                }
                Ok(())
            })?;
        }

        for contact in replies {
            match self.reply_to_renewal(&contact).await {
                Ok(()) => report.replies += 1,
                Err(e) => warn!("Could not answer session renewal from {}: {}", contact, e),
            }
        }

        if report.fetched > 0 {
            debug!(
                "Processed {} of {} announcements ({} ignored, {} replayed)",
                report.processed, report.fetched, report.ignored, report.replayed
            );
        }
        Ok(report)
    }

    fn process_item(&self, item: &BulletinItem) -> CourierResult<ItemOutcome> {
        let owner = self.ctx.owner;
        let already_seen = self
            .ctx
            .store
            .read(|tx| tx.announcement_cursor(&owner))?
            .map_or(false, |cursor| item.counter <= cursor);
        if already_seen {
            return Ok(ItemOutcome::Replayed);
        }

        let result = match self.ctx.session.feed_incoming_announcement(&item.data) {
            Some(result) if result.announcer_id != owner => result,
            _ => {
                self.advance_cursor(item.counter)?;
                return Ok(ItemOutcome::Ignored);
            }
        };

        let peer_status = self.ctx.session.peer_session_status(&result.announcer_id);
        let user_data = AnnouncementUserData::parse(&result.user_data);
        let now = self.ctx.time.now();

        let processed = self.ctx.store.transact(|tx| {
            if tx.announcement_cursor(&owner)? >= Some(item.counter) {
                return Ok(None);
            }
            let processed = upsert_announcer(tx, owner, &result, &user_data, peer_status, now)?;
            tx.set_announcement_cursor(&owner, item.counter)?;
            Ok(Some(processed))
        })?;

        match processed {
            Some(processed) => {
                info!(
                    "Announcement from {} processed (new contact: {}, status: {})",
                    processed.contact, processed.new_contact, processed.status
                );
                Ok(ItemOutcome::Processed(processed))
            }
            None => Ok(ItemOutcome::Replayed),
        }
    }

    fn advance_cursor(&self, counter: u64) -> CourierResult<()> {
        let owner = self.ctx.owner;
        self.ctx.store.transact(|tx| {
            if tx.announcement_cursor(&owner)? < Some(counter) {
                tx.set_announcement_cursor(&owner, counter)?;
            }
            Ok(())
        })
    }

    /// Answer a peer that renewed a discussion we had already accepted
    async fn reply_to_renewal(&self, contact_id: &UserId) -> CourierResult<()> {
        let owner = self.ctx.owner;
        let contact = self
            .ctx
            .store
            .read(|tx| tx.contact(&owner, contact_id))?
            .ok_or_else(|| CourierError::contact_not_found(contact_id))?;
        let announcement = self.establish(&contact, DiscussionDirection::Received, None)?;
        self.send_announcement(contact_id, &announcement).await?;
        Ok(())
    }

    /// Retry every discussion whose announcement has not reached the network
    ///
    /// Each discussion gets up to `max_send_attempts` tries, each preceded by
    /// `retry_delay`, and stops at its first success.
    pub async fn retry_pending(&self) -> CourierResult<RetryReport> {
        let owner = self.ctx.owner;
        let pending: Vec<Discussion> = self
            .ctx
            .store
            .read(|tx| tx.discussions(&owner))?
            .into_iter()
            .filter(Discussion::needs_announcement_retry)
            .collect();

        let mut report = RetryReport {
            discussions: pending.len(),
            ..RetryReport::default()
        };
        let retry = &self.ctx.config.announcement;

        for discussion in pending {
            let contact = discussion.contact_user_id;
            let Some(announcement) = discussion.pending_announcement else {
                warn!("Discussion with {} failed to send but has no pending announcement", contact);
                continue;
            };

            for attempt in 1..=retry.max_send_attempts {
                self.ctx.time.sleep(retry.retry_delay).await;
                report.attempts += 1;
                match self.send_announcement(&contact, &announcement).await {
                    Ok(_) => {
                        info!("Pending announcement for {} sent on attempt {}", contact, attempt);
                        report.succeeded += 1;
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        debug!("Retry {} for {} failed: {}", attempt, contact, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(report)
    }
}

// ----------------------------------------------------------------------------
// Upsert Helpers
// ----------------------------------------------------------------------------

/// Insert or refresh the announcer's contact and discussion
fn upsert_announcer(
    tx: &mut dyn StoreTransaction,
    owner: UserId,
    result: &AnnouncementResult,
    user_data: &AnnouncementUserData,
    peer_status: SessionStatus,
    now: Timestamp,
) -> CourierResult<ProcessedAnnouncement> {
    let announcer = result.announcer_id;

    let new_contact = match tx.contact(&owner, &announcer)? {
        Some(mut contact) => {
            if contact.public_key != result.announcer_public_key {
                contact.public_key = result.announcer_public_key.clone();
                tx.put_contact(&contact)?;
            }
            false
        }
        None => {
            let name = match &user_data.username {
                Some(name) => name.clone(),
                None => next_request_name(tx, &owner)?,
            };
            tx.put_contact(&Contact::new(
                owner,
                announcer,
                name,
                result.announcer_public_key.clone(),
                now,
            ))?;
            true
        }
    };

    let mut needs_reply = false;
    let discussion = match tx.discussion(&owner, &announcer)? {
        Some(mut discussion) => {
            if discussion.we_accepted {
                let keeps_failure = discussion.status == DiscussionStatus::SendFailed
                    && discussion.pending_announcement.is_some();
                if !keeps_failure {
                    discussion.status = status_from_session(peer_status);
                }
                needs_reply = peer_status == SessionStatus::PeerRequested;
            }
            discussion
        }
        None => Discussion::new(owner, announcer, DiscussionDirection::Received, false, now),
    };

    let mut discussion = discussion;
    if user_data.message.is_some() {
        discussion.last_announcement_message = user_data.message.clone();
    }
    discussion.updated_at = now;
    tx.put_discussion(&discussion)?;

    Ok(ProcessedAnnouncement {
        contact: announcer,
        new_contact,
        status: discussion.status,
        needs_reply,
    })
}

/// "New Request N" where N is one more than the highest auto-assigned number
fn next_request_name(tx: &dyn StoreTransaction, owner: &UserId) -> CourierResult<String> {
    let highest = tx
        .contacts(owner)?
        .iter()
        .filter_map(|c| c.name.strip_prefix(NEW_REQUEST_PREFIX)?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(format!("{}{}", NEW_REQUEST_PREFIX, highest + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_sessions_make_active_discussions() {
        assert_eq!(status_from_session(SessionStatus::Active), DiscussionStatus::Active);
        for status in [
            SessionStatus::SelfRequested,
            SessionStatus::PeerRequested,
            SessionStatus::NoSession,
            SessionStatus::Saturated,
            SessionStatus::Killed,
        ] {
            assert_eq!(status_from_session(status), DiscussionStatus::Pending);
        }
    }
}
