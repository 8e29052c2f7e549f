//! Outbound send queue and inbound board polling
//!
//! Outgoing messages move `WaitingSession → Ready → Sent → Delivered`. The
//! ciphertext produced by the session module is written to the store before
//! it is handed to the network, and retries reuse that ciphertext verbatim.
//! Incoming messages are decrypted from the message board, deduplicated by
//! message id within their conversation and stored as `Delivered`.

use std::collections::{BTreeSet, HashMap};

use courier_core::{
    decode_message, encode_message, BoardEntry, CourierError, CourierEvent, CourierResult,
    DecodedPayload, DiscussionStatus, ForwardOf, Message, MessageDirection, MessageId, MessageKey,
    MessageStatus, MessageType, ReplyTo, Seeker, SessionStatus, StoreExt, Timestamp, UserId,
    ValidationError,
};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::context::CourierContext;
use crate::guard::{KeyedGuard, SingleFlight};

// ----------------------------------------------------------------------------
// Requests and Reports
// ----------------------------------------------------------------------------

/// A message the caller wants to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Contact id as hex; its shape is validated by `send`
    pub contact: String,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<MessageId>,
    pub forward_of: Option<ForwardOf>,
}

impl MessageDraft {
    pub fn text(contact: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            contact: contact.into(),
            content: content.into(),
            message_type: MessageType::Text,
            reply_to: None,
            forward_of: None,
        }
    }

    pub fn keep_alive(contact: impl Into<String>) -> Self {
        Self {
            contact: contact.into(),
            content: String::new(),
            message_type: MessageType::KeepAlive,
            reply_to: None,
            forward_of: None,
        }
    }

    /// Cite an earlier message of the same conversation
    pub fn replying_to(mut self, original: MessageId) -> Self {
        self.reply_to = Some(original);
        self
    }

    /// Cite content from another conversation
    pub fn forwarding(mut self, original_content: impl Into<String>, from: Option<UserId>) -> Self {
        self.forward_of = Some(ForwardOf {
            original_content: original_content.into(),
            original_contact_id: from,
        });
        self
    }
}

/// Result of one `process_send_queue_for_contact` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Another call is already processing this contact
    Skipped,
    /// No accepted discussion, a broken one, or the session cannot send yet
    NotReady,
    Processed(QueueReport),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueReport {
    /// Messages encrypted and moved to `Ready`
    pub encrypted: usize,
    /// Messages accepted by the message board
    pub sent: usize,
    /// `Ready` messages left for a later retry
    pub deferred: usize,
    /// Messages marked `Failed`
    pub failed: usize,
    /// Encryption stopped because the session reported not ready
    pub session_not_ready: bool,
    /// The discussion was marked `Broken`
    pub session_broken: bool,
}

/// Result of one `fetch_messages` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Another fetch is already running for this identity
    Skipped,
    Completed(FetchReport),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Seeker-set reads performed
    pub iterations: u32,
    pub entries: usize,
    pub undecryptable: usize,
    pub undecodable: usize,
    pub keep_alives: usize,
    pub malformed_ids: usize,
    pub acknowledged: usize,
    pub stored: StoreReport,
}

/// Result of `store_decrypted_messages`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreReport {
    pub inserted: usize,
    /// Retransmissions that updated an existing row in place
    pub updated: usize,
    /// Messages from senders without a discussion
    pub orphaned: usize,
    pub dangling_replies: usize,
}

impl StoreReport {
    fn absorb(&mut self, other: StoreReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.orphaned += other.orphaned;
        self.dangling_replies += other.dangling_replies;
    }
}

/// A decrypted, decoded board message awaiting storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub sender: UserId,
    pub seeker: Seeker,
    pub timestamp: Timestamp,
    pub payload: DecodedPayload,
}

enum Encryption {
    Ready(Message),
    /// The row changed underneath us; skip it for this run
    Stale,
    NotReady,
    Broken,
}

enum Stored {
    Inserted(MessageKey, Option<MessageId>),
    Updated,
    Orphaned,
}

// ----------------------------------------------------------------------------
// Message Delivery Engine
// ----------------------------------------------------------------------------

/// Outbound queue processing and inbound message-board polling
#[derive(Debug)]
pub struct MessageDeliveryEngine {
    ctx: CourierContext,
    queue_guard: KeyedGuard<UserId>,
    fetch_flight: SingleFlight,
}

impl MessageDeliveryEngine {
    pub fn new(ctx: CourierContext) -> Self {
        Self {
            ctx,
            queue_guard: KeyedGuard::new(),
            fetch_flight: SingleFlight::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Validate and enqueue a message as `WaitingSession`
    pub fn send(&self, draft: MessageDraft) -> CourierResult<Message> {
        let owner = self.ctx.owner;
        let contact: UserId = draft.contact.parse()?;
        if contact == owner {
            return Err(ValidationError::SelfContact.into());
        }
        if draft.message_type == MessageType::Text && draft.content.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "content" }.into());
        }

        let now = self.ctx.time.now();
        let message = self.ctx.store.transact(|tx| {
            let mut discussion = tx
                .discussion(&owner, &contact)?
                .ok_or_else(|| CourierError::discussion_not_found(contact))?;

            let mut message =
                Message::outgoing(owner, contact, draft.message_type, draft.content.clone(), now);
            if let Some(original) = draft.reply_to {
                let original_content = tx
                    .message_by_message_id(&owner, &contact, &original)?
                    .map(|m| m.content);
                message.reply_to = Some(ReplyTo {
                    original_message_id: original,
                    original_content,
                });
            }
            message.forward_of = draft.forward_of.clone();

            let key = tx.insert_message(&message)?;
            message.key = Some(key);

            if !message.is_keep_alive() {
                discussion.record_last_message(&message);
                discussion.updated_at = now;
                tx.put_discussion(&discussion)?;
            }
            Ok(message)
        })?;

        debug!(
            "Queued {} message {} for {}",
            message.message_type,
            message.key.map(|k| k.to_string()).unwrap_or_default(),
            contact
        );
        Ok(message)
    }

    /// Encrypt and transmit the outbound queue of one contact
    ///
    /// A concurrent call for the same contact returns `Skipped` immediately.
    pub async fn process_send_queue_for_contact(&self, contact: &UserId) -> CourierResult<QueueOutcome> {
        let Some(_token) = self.queue_guard.try_acquire(*contact) else {
            debug!("Send queue for {} already being processed", contact);
            return Ok(QueueOutcome::Skipped);
        };

        let owner = self.ctx.owner;
        let Some(discussion) = self.ctx.store.read(|tx| tx.discussion(&owner, contact))? else {
            return Ok(QueueOutcome::NotReady);
        };
        if !discussion.we_accepted {
            return Ok(QueueOutcome::NotReady);
        }
        // A desynchronized session stays closed until the caller renews it
        if discussion.status == DiscussionStatus::Broken {
            debug!("Discussion with {} is broken; queue held until renewal", contact);
            return Ok(QueueOutcome::NotReady);
        }
        if !self.ctx.session.peer_session_status(contact).allows_sending() {
            return Ok(QueueOutcome::NotReady);
        }

        let queue: Vec<MessageKey> = self
            .ctx
            .store
            .read(|tx| {
                tx.messages_for_contact(
                    &owner,
                    contact,
                    &[MessageStatus::WaitingSession, MessageStatus::Ready],
                )
            })?
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Outgoing)
            .filter_map(|m| m.key)
            .collect();

        let mut report = QueueReport::default();
        for key in queue {
            // Re-read: a renew, resend or delete may have run since the queue was loaded
            let Some(mut message) = self.ctx.store.read(|tx| tx.message(key))? else {
                continue;
            };

            if message.status == MessageStatus::WaitingSession {
                match self.encrypt(message)? {
                    Encryption::Ready(ready) => {
                        report.encrypted += 1;
                        message = ready;
                    }
                    Encryption::Stale => continue,
                    Encryption::NotReady => {
                        report.session_not_ready = true;
                        break;
                    }
                    Encryption::Broken => {
                        report.failed += 1;
                        report.session_broken = true;
                        break;
                    }
                }
            }

            if message.status != MessageStatus::Ready {
                continue;
            }
            let now = self.ctx.time.now();
            if message.when_to_send.map_or(false, |when| when > now) {
                report.deferred += 1;
                continue;
            }
            if self.transmit(message).await? {
                report.sent += 1;
            } else {
                report.deferred += 1;
            }
        }

        if report.encrypted + report.sent + report.failed > 0 {
            info!(
                "Send queue for {}: {} encrypted, {} sent, {} deferred, {} failed",
                contact, report.encrypted, report.sent, report.deferred, report.failed
            );
        }
        Ok(QueueOutcome::Processed(report))
    }

    /// Serialize and encrypt a `WaitingSession` message, persisting the result
    fn encrypt(&self, mut message: Message) -> CourierResult<Encryption> {
        let owner = self.ctx.owner;
        let contact = message.contact_user_id;
        let key = message.require_key()?;

        let payload = match &message.serialized_content {
            Some(payload) => payload.clone(),
            None => encode_message(&message)?,
        };

        let output = match self.ctx.session.send_message(&contact, &payload) {
            Ok(Some(output)) => output,
            Ok(None) if self.ctx.session.peer_session_status(&contact) != SessionStatus::Active => {
                debug!("Session with {} not ready, message {} stays queued", contact, key);
                return Ok(Encryption::NotReady);
            }
            Ok(None) => {
                error!("Session with {} is active but refused to encrypt {}", contact, key);
                self.mark_broken(key, &contact)?;
                return Ok(Encryption::Broken);
            }
            Err(e) => {
                error!("Session failure encrypting {} for {}: {}", key, contact, e);
                self.mark_broken(key, &contact)?;
                return Ok(Encryption::Broken);
            }
        };

        let now = self.ctx.time.now();
        message.status = MessageStatus::Ready;
        message.serialized_content = Some(payload);
        message.seeker = Some(output.seeker);
        message.encrypted_message = Some(output.ciphertext);
        message.when_to_send = Some(now);

        let persisted = self.ctx.store.transact(|tx| {
            match tx.message(key)? {
                Some(current) if current.status == MessageStatus::WaitingSession => {
                    tx.update_message(&message)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        if !persisted {
            warn!("Message {} changed while encrypting; ciphertext discarded", key);
            return Ok(Encryption::Stale);
        }
        Ok(Encryption::Ready(message))
    }

    fn mark_broken(&self, key: MessageKey, contact: &UserId) -> CourierResult<()> {
        let owner = self.ctx.owner;
        let now = self.ctx.time.now();
        let broken = self.ctx.store.transact(|tx| {
            if let Some(mut message) = tx.message(key)? {
                if message.status.can_advance_to(MessageStatus::Failed) {
                    message.status = MessageStatus::Failed;
                    tx.update_message(&message)?;
                }
            }
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

    /// Hand a `Ready` message to the board; `Ok(false)` means rescheduled
    async fn transmit(&self, message: Message) -> CourierResult<bool> {
        let key = message.require_key()?;
        let contact = message.contact_user_id;

        let (Some(seeker), Some(ciphertext)) = (message.seeker.clone(), message.encrypted_message.clone()) else {
            warn!("Ready message {} has no ciphertext; re-queueing for encryption", key);
            self.ctx.store.transact(|tx| {
                if let Some(mut current) = tx.message(key)? {
                    if current.status == MessageStatus::Ready {
                        current.status = MessageStatus::WaitingSession;
                        current.seeker = None;
                        current.when_to_send = None;
                        tx.update_message(&current)?;
                    }
                }
                Ok(())
            })?;
            return Ok(false);
        };

        let entry = BoardEntry { seeker, ciphertext };
        match self.ctx.transport.send_message(&entry).await {
            Ok(()) => {
                let sent = self.ctx.store.transact(|tx| {
                    match tx.message(key)? {
                        Some(mut current) if current.status == MessageStatus::Ready => {
                            current.status = MessageStatus::Sent;
                            current.encrypted_message = None;
                            current.when_to_send = None;
                            tx.update_message(&current)?;
                            Ok(true)
                        }
                        _ => Ok(false),
                    }
                })?;
                if sent && !message.is_keep_alive() {
                    self.ctx.events.emit(CourierEvent::MessageSent { contact, key });
                }
                Ok(true)
            }
            Err(e) => {
                let retry_at = self.ctx.time.now() + self.ctx.config.delivery.retry_delay;
                warn!("Board send of {} to {} failed, retrying later: {}", key, contact, e);
                self.ctx.store.transact(|tx| {
                    if let Some(mut current) = tx.message(key)? {
                        if current.status == MessageStatus::Ready {
                            current.when_to_send = Some(retry_at);
                            tx.update_message(&current)?;
                        }
                    }
                    Ok(())
                })?;
                Ok(false)
            }
        }
    }

    /// Process every contact with queued outgoing messages
    pub async fn process_all_send_queues(&self) -> CourierResult<Vec<(UserId, QueueOutcome)>> {
        let owner = self.ctx.owner;
        let contacts: BTreeSet<UserId> = self.ctx.store.read(|tx| {
            let mut contacts = BTreeSet::new();
            for status in [MessageStatus::WaitingSession, MessageStatus::Ready] {
                for message in tx.messages_by_direction_status(&owner, MessageDirection::Outgoing, status)? {
                    contacts.insert(message.contact_user_id);
                }
            }
            Ok(contacts)
        })?;

        let runs = contacts.iter().map(|contact| async move {
            (*contact, self.process_send_queue_for_contact(contact).await)
        });

        let mut outcomes = Vec::with_capacity(contacts.len());
        for (contact, result) in join_all(runs).await {
            match result {
                Ok(outcome) => outcomes.push((contact, outcome)),
                Err(e) => warn!("Send queue for {} failed: {}", contact, e),
            }
        }
        Ok(outcomes)
    }

    /// Reset an outgoing `Failed` message to `WaitingSession`
    ///
    /// This is the only transition that moves a status backwards.
    pub fn resend(&self, key: MessageKey) -> CourierResult<bool> {
        let owner = self.ctx.owner;
        let reset = self.ctx.store.transact(|tx| {
            let Some(mut message) = tx.message(key)? else {
                return Ok(false);
            };
            if message.owner_user_id != owner
                || message.direction != MessageDirection::Outgoing
                || message.status != MessageStatus::Failed
            {
                return Ok(false);
            }
            message.status = MessageStatus::WaitingSession;
            message.seeker = None;
            message.encrypted_message = None;
            message.when_to_send = None;
            tx.update_message(&message)?;
            Ok(true)
        })?;
        if reset {
            info!("Message {} reset for resend", key);
        }
        Ok(reset)
    }

    /// Enqueue keep-alives for the peers the session module asks for
    pub fn send_keep_alives(&self) -> CourierResult<usize> {
        let owner = self.ctx.owner;
        let peers = self.ctx.session.refresh()?;
        let now = self.ctx.time.now();
        let mut queued = 0;

        for peer in peers {
            let inserted = self.ctx.store.transact(|tx| {
                if tx.discussion(&owner, &peer)?.is_none() {
                    return Ok(false);
                }
                let already_queued = tx
                    .messages_for_contact(
                        &owner,
                        &peer,
                        &[MessageStatus::WaitingSession, MessageStatus::Ready],
                    )?
                    .iter()
                    .any(|m| m.is_keep_alive());
                if already_queued {
                    return Ok(false);
                }
                tx.insert_message(&Message::outgoing(
                    owner,
                    peer,
                    MessageType::KeepAlive,
                    String::new(),
                    now,
                ))?;
                Ok(true)
            })?;
            if inserted {
                queued += 1;
            }
        }

        if queued > 0 {
            debug!("Queued {} keep-alive messages", queued);
        }
        Ok(queued)
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Poll the message board until the seeker set stabilizes
    ///
    /// Single-flight per identity: a concurrent call returns `Skipped`.
    pub async fn fetch_messages(&self) -> CourierResult<FetchOutcome> {
        let Some(_token) = self.fetch_flight.try_acquire() else {
            debug!("Message fetch already running");
            return Ok(FetchOutcome::Skipped);
        };

        let delivery = &self.ctx.config.delivery;
        let mut report = FetchReport::default();
        let mut previous: Option<Vec<Seeker>> = None;

        while report.iterations < delivery.max_fetch_iterations {
            let mut seekers = self.ctx.session.message_board_read_keys();
            seekers.sort();
            seekers.dedup();
            report.iterations += 1;

            if seekers.is_empty() || previous.as_ref() == Some(&seekers) {
                break;
            }

            let entries = self.ctx.transport.fetch_messages(&seekers).await?;
            report.entries += entries.len();

            let mut batch = Vec::new();
            let mut acks: HashMap<UserId, Vec<Seeker>> = HashMap::new();
            for entry in entries {
                let Some(incoming) = self
                    .ctx
                    .session
                    .feed_incoming_message_board_read(&entry.seeker, &entry.ciphertext)
                else {
                    report.undecryptable += 1;
                    continue;
                };

                if !incoming.acknowledged_seekers.is_empty() {
                    acks.entry(incoming.sender_id)
                        .or_default()
                        .extend(incoming.acknowledged_seekers.iter().cloned());
                }

                let payload = match decode_message(&incoming.plaintext) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Undecodable payload from {}: {}", incoming.sender_id, e);
                        report.undecodable += 1;
                        continue;
                    }
                };
                if payload.message_type == MessageType::KeepAlive {
                    report.keep_alives += 1;
                    continue;
                }
                if payload.has_malformed_id() {
                    warn!(
                        "Message from {} has a missing or malformed id; storing without deduplication",
                        incoming.sender_id
                    );
                    report.malformed_ids += 1;
                }

                batch.push(DecryptedMessage {
                    sender: incoming.sender_id,
                    seeker: entry.seeker,
                    timestamp: incoming.timestamp,
                    payload,
                });
            }

            report.stored.absorb(self.store_decrypted_messages(batch)?);
            for (sender, seekers) in acks {
                report.acknowledged += self.acknowledge_messages(&seekers, &sender)?;
            }

            previous = Some(seekers);
            self.ctx.time.sleep(delivery.fetch_delay).await;
        }

        if report.entries > 0 {
            info!(
                "Fetched {} board entries in {} iterations ({} new, {} updated, {} acknowledged)",
                report.entries,
                report.iterations,
                report.stored.inserted,
                report.stored.updated,
                report.acknowledged
            );
        }
        Ok(FetchOutcome::Completed(report))
    }

    /// Store decrypted messages, one transaction per message
    pub fn store_decrypted_messages(&self, batch: Vec<DecryptedMessage>) -> CourierResult<StoreReport> {
        let owner = self.ctx.owner;
        let mut report = StoreReport::default();

        for item in batch {
            let sender = item.sender;
            let mut dangling = false;
            let stored = self.ctx.store.transact(|tx| {
                let Some(mut discussion) = tx.discussion(&owner, &sender)? else {
                    return Ok(Stored::Orphaned);
                };
                let payload = &item.payload;

                if let Some(id) = payload.message_id {
                    if let Some(mut existing) = tx.message_by_message_id(&owner, &sender, &id)? {
                        if existing.direction == MessageDirection::Incoming {
                            existing.content = payload.content.clone();
                            existing.forward_of = payload.forward_of.clone();
                            if let Some(original) = payload.reply_to {
                                let original_content = tx
                                    .message_by_message_id(&owner, &sender, &original)?
                                    .map(|m| m.content);
                                existing.reply_to = Some(ReplyTo {
                                    original_message_id: original,
                                    original_content,
                                });
                            }
                            tx.update_message(&existing)?;
                            if discussion.last_message_id == Some(id) {
                                discussion.last_message_content = Some(existing.content.clone());
                                tx.put_discussion(&discussion)?;
                            }
                            return Ok(Stored::Updated);
                        }
                    }
                }

                let reply_to = match payload.reply_to {
                    Some(original) => {
                        let original_content = tx
                            .message_by_message_id(&owner, &sender, &original)?
                            .map(|m| m.content);
                        dangling = original_content.is_none();
                        Some(ReplyTo {
                            original_message_id: original,
                            original_content,
                        })
                    }
                    None => None,
                };

                let mut message = Message {
                    key: None,
                    owner_user_id: owner,
                    contact_user_id: sender,
                    message_id: payload.message_id,
                    content: payload.content.clone(),
                    serialized_content: None,
                    message_type: payload.message_type,
                    direction: MessageDirection::Incoming,
                    status: MessageStatus::Delivered,
                    seeker: Some(item.seeker.clone()),
                    encrypted_message: None,
                    when_to_send: None,
                    timestamp: item.timestamp,
                    reply_to,
                    forward_of: payload.forward_of.clone(),
                };
                let key = tx.insert_message(&message)?;
                message.key = Some(key);

                discussion.unread_count = discussion.unread_count.saturating_add(1);
                discussion.record_last_message(&message);
                discussion.updated_at = item.timestamp.max(discussion.updated_at);
                tx.put_discussion(&discussion)?;
                Ok(Stored::Inserted(key, message.message_id))
            })?;

            match stored {
                Stored::Inserted(key, message_id) => {
                    report.inserted += 1;
                    if dangling {
                        warn!("Message {} from {} replies to an unknown message", key, sender);
                        report.dangling_replies += 1;
                    }
                    self.ctx.events.emit(CourierEvent::MessageReceived {
                        contact: sender,
                        key,
                        message_id,
                    });
                }
                Stored::Updated => {
                    debug!("Retransmitted message from {} updated in place", sender);
                    report.updated += 1;
                }
                Stored::Orphaned => {
                    warn!("Dropping message from {}: no discussion", sender);
                    report.orphaned += 1;
                }
            }
        }
        Ok(report)
    }

    /// Mark outgoing messages acknowledged by `contact` as `Delivered`
    ///
    /// Delivered keep-alives are purged afterwards.
    pub fn acknowledge_messages(&self, seekers: &[Seeker], contact: &UserId) -> CourierResult<usize> {
        let owner = self.ctx.owner;
        let acked: BTreeSet<&Seeker> = seekers.iter().collect();

        let (delivered, purged) = self.ctx.store.transact(|tx| {
            let candidates =
                tx.messages_for_contact(&owner, contact, &[MessageStatus::Ready, MessageStatus::Sent])?;
            let mut delivered = 0;
            for mut message in candidates {
                let matches = message.direction == MessageDirection::Outgoing
                    && message.seeker.as_ref().map_or(false, |s| acked.contains(s));
                if !matches {
                    continue;
                }
                message.status = MessageStatus::Delivered;
                message.encrypted_message = None;
                message.when_to_send = None;
                tx.update_message(&message)?;
                delivered += 1;
            }
            let purged =
                tx.delete_messages_where(&owner, MessageType::KeepAlive, MessageStatus::Delivered)?;
            Ok((delivered, purged))
        })?;

        if delivered > 0 {
            debug!("{} messages to {} acknowledged ({} keep-alives purged)", delivered, contact, purged);
        }
        Ok(delivered)
    }

    /// Flip an incoming `Delivered` message to `Read`; `false` if nothing changed
    pub fn mark_as_read(&self, key: MessageKey) -> CourierResult<bool> {
        let owner = self.ctx.owner;
        self.ctx.store.transact(|tx| {
            let Some(mut message) = tx.message(key)? else {
                return Ok(false);
            };
            if message.owner_user_id != owner
                || message.direction != MessageDirection::Incoming
                || message.status != MessageStatus::Delivered
            {
                return Ok(false);
            }
            message.status = MessageStatus::Read;
            tx.update_message(&message)?;

            if let Some(mut discussion) = tx.discussion(&owner, &message.contact_user_id)? {
                discussion.unread_count = discussion.unread_count.saturating_sub(1);
                tx.put_discussion(&discussion)?;
            }
            Ok(true)
        })
    }

    /// Conversation with `contact`, oldest first
    pub fn messages(&self, contact: &UserId) -> CourierResult<Vec<Message>> {
        let owner = self.ctx.owner;
        self.ctx
            .store
            .read(|tx| tx.messages_for_contact(&owner, contact, &[]))
    }
}
