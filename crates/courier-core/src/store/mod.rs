//! Persistent store contract
//!
//! The engine keeps contacts, discussions and messages in a transactional
//! store. Every multi-row mutation (message insert plus discussion counters,
//! cascade delete, mark-read plus decrement, cursor advance plus discussion
//! upsert) runs inside one [`StoreTransaction`].
//!
//! Transactions are synchronous and must never be held across an `.await`.
//! A transaction that is dropped without [`StoreTransaction::commit`] is
//! rolled back.

pub mod memory;

pub use memory::MemoryStore;

use crate::errors::CourierResult;
use crate::model::{Contact, Discussion, Message, MessageDirection, MessageStatus, MessageType};
use crate::types::{MessageId, MessageKey, UserId};

// ----------------------------------------------------------------------------
// Transaction Contract
// ----------------------------------------------------------------------------

/// An open store transaction
pub trait StoreTransaction {
    // Contacts

    fn contact(&self, owner: &UserId, user: &UserId) -> CourierResult<Option<Contact>>;
    fn contacts(&self, owner: &UserId) -> CourierResult<Vec<Contact>>;
    /// Insert or replace the contact keyed by (owner, user)
    fn put_contact(&mut self, contact: &Contact) -> CourierResult<()>;
    fn delete_contact(&mut self, owner: &UserId, user: &UserId) -> CourierResult<bool>;

    // Discussions

    fn discussion(&self, owner: &UserId, contact: &UserId) -> CourierResult<Option<Discussion>>;
    fn discussions(&self, owner: &UserId) -> CourierResult<Vec<Discussion>>;
    /// Insert or replace the discussion keyed by (owner, contact)
    fn put_discussion(&mut self, discussion: &Discussion) -> CourierResult<()>;
    fn delete_discussion(&mut self, owner: &UserId, contact: &UserId) -> CourierResult<bool>;

    // Messages

    fn message(&self, key: MessageKey) -> CourierResult<Option<Message>>;

    /// Dedup lookup within one (owner, contact) conversation
    fn message_by_message_id(
        &self,
        owner: &UserId,
        contact: &UserId,
        message_id: &MessageId,
    ) -> CourierResult<Option<Message>>;

    /// Messages of one conversation, ordered by timestamp then key
    ///
    /// An empty `statuses` slice selects every status.
    fn messages_for_contact(
        &self,
        owner: &UserId,
        contact: &UserId,
        statuses: &[MessageStatus],
    ) -> CourierResult<Vec<Message>>;

    fn messages_by_status(
        &self,
        owner: &UserId,
        status: MessageStatus,
    ) -> CourierResult<Vec<Message>>;

    fn messages_by_direction_status(
        &self,
        owner: &UserId,
        direction: MessageDirection,
        status: MessageStatus,
    ) -> CourierResult<Vec<Message>>;

    /// Store a new message and assign its local key
    fn insert_message(&mut self, message: &Message) -> CourierResult<MessageKey>;

    /// Overwrite a stored message; fails if it has no key
    fn update_message(&mut self, message: &Message) -> CourierResult<()>;

    fn delete_messages_for_contact(&mut self, owner: &UserId, contact: &UserId)
        -> CourierResult<usize>;

    fn delete_messages_where(
        &mut self,
        owner: &UserId,
        message_type: MessageType,
        status: MessageStatus,
    ) -> CourierResult<usize>;

    // Announcement cursor

    fn announcement_cursor(&self, owner: &UserId) -> CourierResult<Option<u64>>;
    fn set_announcement_cursor(&mut self, owner: &UserId, cursor: u64) -> CourierResult<()>;

    /// Make every write of this transaction durable
    fn commit(self: Box<Self>) -> CourierResult<()>;
}

/// Transactional storage backend
pub trait Store: Send + Sync {
    /// Open a transaction; writers are serialized
    fn begin(&self) -> CourierResult<Box<dyn StoreTransaction + '_>>;
}

// ----------------------------------------------------------------------------
// Closure Helper
// ----------------------------------------------------------------------------

/// Run a closure inside a transaction, committing only if it succeeds
pub trait StoreExt: Store {
    fn transact<T, F>(&self, f: F) -> CourierResult<T>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> CourierResult<T>,
    {
        let mut tx = self.begin()?;
        let value = f(&mut *tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Read-only convenience; the transaction is rolled back afterwards
    fn read<T, F>(&self, f: F) -> CourierResult<T>
    where
        F: FnOnce(&dyn StoreTransaction) -> CourierResult<T>,
    {
        let tx = self.begin()?;
        f(&*tx)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
