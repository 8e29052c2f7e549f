//! In-memory store
//!
//! A transaction takes the store lock, works on a private copy of the state
//! and swaps it in on commit. Holding the lock for the whole transaction
//! serializes writers the same way `BEGIN IMMEDIATE` does for SQLite.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::errors::{CourierError, CourierResult, StorageError};
use crate::model::{Contact, Discussion, Message, MessageDirection, MessageStatus, MessageType};
use crate::session::SessionPersistence;
use crate::store::{Store, StoreTransaction};
use crate::types::{MessageId, MessageKey, UserId};

type PairKey = (UserId, UserId);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    contacts: BTreeMap<PairKey, Contact>,
    discussions: BTreeMap<PairKey, Discussion>,
    messages: BTreeMap<MessageKey, Message>,
    next_key: u64,
    cursors: HashMap<UserId, u64>,
}

// ----------------------------------------------------------------------------
// Memory Store
// ----------------------------------------------------------------------------

/// Volatile [`Store`] and [`SessionPersistence`] for tests and ephemeral identities
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    sessions: Mutex<HashMap<UserId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored message rows across all owners
    pub fn message_count(&self) -> usize {
        self.state.lock().map(|s| s.messages.len()).unwrap_or(0)
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> CourierResult<Box<dyn StoreTransaction + '_>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| CourierError::Storage(StorageError::Poisoned))?;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

impl SessionPersistence for MemoryStore {
    fn persist_session(&self, owner: &UserId, state: &[u8]) -> CourierResult<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| CourierError::Storage(StorageError::Poisoned))?;
        sessions.insert(*owner, state.to_vec());
        Ok(())
    }

    fn load_session(&self, owner: &UserId) -> CourierResult<Option<Vec<u8>>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| CourierError::Storage(StorageError::Poisoned))?;
        Ok(sessions.get(owner).cloned())
    }
}

// ----------------------------------------------------------------------------
// Memory Transaction
// ----------------------------------------------------------------------------

struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, MemoryState>,
    working: MemoryState,
}

impl MemoryTransaction<'_> {
    fn conversation<'s>(
        &'s self,
        owner: &'s UserId,
        contact: &'s UserId,
    ) -> impl Iterator<Item = &'s Message> + 's {
        self.working
            .messages
            .values()
            .filter(move |m| &m.owner_user_id == owner && &m.contact_user_id == contact)
    }
}

fn sorted(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| (m.timestamp, m.key));
    messages
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn contact(&self, owner: &UserId, user: &UserId) -> CourierResult<Option<Contact>> {
        Ok(self.working.contacts.get(&(*owner, *user)).cloned())
    }

    fn contacts(&self, owner: &UserId) -> CourierResult<Vec<Contact>> {
        Ok(self
            .working
            .contacts
            .values()
            .filter(|c| &c.owner_user_id == owner)
            .cloned()
            .collect())
    }

    fn put_contact(&mut self, contact: &Contact) -> CourierResult<()> {
        self.working
            .contacts
            .insert((contact.owner_user_id, contact.user_id), contact.clone());
        Ok(())
    }

    fn delete_contact(&mut self, owner: &UserId, user: &UserId) -> CourierResult<bool> {
        Ok(self.working.contacts.remove(&(*owner, *user)).is_some())
    }

    fn discussion(&self, owner: &UserId, contact: &UserId) -> CourierResult<Option<Discussion>> {
        Ok(self.working.discussions.get(&(*owner, *contact)).cloned())
    }

    fn discussions(&self, owner: &UserId) -> CourierResult<Vec<Discussion>> {
        Ok(self
            .working
            .discussions
            .values()
            .filter(|d| &d.owner_user_id == owner)
            .cloned()
            .collect())
    }

    fn put_discussion(&mut self, discussion: &Discussion) -> CourierResult<()> {
        self.working.discussions.insert(
            (discussion.owner_user_id, discussion.contact_user_id),
            discussion.clone(),
        );
        Ok(())
    }

    fn delete_discussion(&mut self, owner: &UserId, contact: &UserId) -> CourierResult<bool> {
        Ok(self.working.discussions.remove(&(*owner, *contact)).is_some())
    }

    fn message(&self, key: MessageKey) -> CourierResult<Option<Message>> {
        Ok(self.working.messages.get(&key).cloned())
    }

    fn message_by_message_id(
        &self,
        owner: &UserId,
        contact: &UserId,
        message_id: &MessageId,
    ) -> CourierResult<Option<Message>> {
        Ok(self
            .conversation(owner, contact)
            .find(|m| m.message_id.as_ref() == Some(message_id))
            .cloned())
    }

    fn messages_for_contact(
        &self,
        owner: &UserId,
        contact: &UserId,
        statuses: &[MessageStatus],
    ) -> CourierResult<Vec<Message>> {
        let messages = self
            .conversation(owner, contact)
            .filter(|m| statuses.is_empty() || statuses.contains(&m.status))
            .cloned()
            .collect();
        Ok(sorted(messages))
    }

    fn messages_by_status(
        &self,
        owner: &UserId,
        status: MessageStatus,
    ) -> CourierResult<Vec<Message>> {
        let messages = self
            .working
            .messages
            .values()
            .filter(|m| &m.owner_user_id == owner && m.status == status)
            .cloned()
            .collect();
        Ok(sorted(messages))
    }

    fn messages_by_direction_status(
        &self,
        owner: &UserId,
        direction: MessageDirection,
        status: MessageStatus,
    ) -> CourierResult<Vec<Message>> {
        let messages = self
            .working
            .messages
            .values()
            .filter(|m| {
                &m.owner_user_id == owner && m.direction == direction && m.status == status
            })
            .cloned()
            .collect();
        Ok(sorted(messages))
    }

    fn insert_message(&mut self, message: &Message) -> CourierResult<MessageKey> {
        self.working.next_key += 1;
        let key = MessageKey::new(self.working.next_key);
        let mut stored = message.clone();
        stored.key = Some(key);
        self.working.messages.insert(key, stored);
        Ok(key)
    }

    fn update_message(&mut self, message: &Message) -> CourierResult<()> {
        let key = message.require_key()?;
        match self.working.messages.get_mut(&key) {
            Some(slot) => {
                *slot = message.clone();
                Ok(())
            }
            None => Err(CourierError::corrupt(format!("message {} does not exist", key))),
        }
    }

    fn delete_messages_for_contact(
        &mut self,
        owner: &UserId,
        contact: &UserId,
    ) -> CourierResult<usize> {
        let before = self.working.messages.len();
        self.working
            .messages
            .retain(|_, m| !(&m.owner_user_id == owner && &m.contact_user_id == contact));
        Ok(before - self.working.messages.len())
    }

    fn delete_messages_where(
        &mut self,
        owner: &UserId,
        message_type: MessageType,
        status: MessageStatus,
    ) -> CourierResult<usize> {
        let before = self.working.messages.len();
        self.working.messages.retain(|_, m| {
            !(&m.owner_user_id == owner && m.message_type == message_type && m.status == status)
        });
        Ok(before - self.working.messages.len())
    }

    fn announcement_cursor(&self, owner: &UserId) -> CourierResult<Option<u64>> {
        Ok(self.working.cursors.get(owner).copied())
    }

    fn set_announcement_cursor(&mut self, owner: &UserId, cursor: u64) -> CourierResult<()> {
        self.working.cursors.insert(*owner, cursor);
        Ok(())
    }

    fn commit(self: Box<Self>) -> CourierResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        trace!("Memory transaction committed");
        Ok(())
    }
}
