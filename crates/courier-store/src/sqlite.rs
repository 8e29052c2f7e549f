//! SQLite implementation of the Courier store
//!
//! One connection behind a mutex. A transaction holds the connection guard
//! from `BEGIN IMMEDIATE` until `COMMIT`, which serializes writers; dropping
//! it without committing issues `ROLLBACK`.
//!
//! Session state is written through the same connection in autocommit mode,
//! so [`SessionPersistence::persist_session`] must never be called while a
//! transaction of this store is open on the same thread.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use courier_core::{
    Contact, CourierError, CourierResult, Discussion, Message, MessageDirection, MessageId,
    MessageKey, MessageStatus, MessageType, Seeker, SessionPersistence, StorageError, Store,
    StoreTransaction, Timestamp, UserId,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info, trace, warn};

use crate::schema;

// ----------------------------------------------------------------------------
// Error Conversion
// ----------------------------------------------------------------------------

trait SqlResultExt<T> {
    fn storage(self) -> CourierResult<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn storage(self) -> CourierResult<T> {
        self.map_err(CourierError::storage)
    }
}

fn parse_user(value: &str) -> CourierResult<UserId> {
    value
        .parse()
        .map_err(|_| CourierError::corrupt(format!("invalid user id column: {}", value)))
}

fn parse_message_id(bytes: &[u8]) -> CourierResult<MessageId> {
    MessageId::from_slice(bytes)
        .ok_or_else(|| CourierError::corrupt(format!("message id of {} bytes", bytes.len())))
}

fn timestamp(millis: i64) -> Timestamp {
    Timestamp::new(millis.max(0) as u64)
}

fn millis(timestamp: Timestamp) -> i64 {
    timestamp.as_millis() as i64
}

// ----------------------------------------------------------------------------
// Row Types
// ----------------------------------------------------------------------------

const CONTACT_COLUMNS: &str = "owner, user_id, name, public_key, created_at";

struct ContactRow {
    owner: String,
    user_id: String,
    name: String,
    public_key: Vec<u8>,
    created_at: i64,
}

impl ContactRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            public_key: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_contact(self) -> CourierResult<Contact> {
        Ok(Contact {
            owner_user_id: parse_user(&self.owner)?,
            user_id: parse_user(&self.user_id)?,
            name: self.name,
            public_key: self.public_key,
            created_at: timestamp(self.created_at),
        })
    }
}

const DISCUSSION_COLUMNS: &str = "owner, contact, we_accepted, direction, status, \
     pending_announcement, last_announcement_message, unread_count, last_message_id, \
     last_message_content, last_message_timestamp, created_at, updated_at";

struct DiscussionRow {
    owner: String,
    contact: String,
    we_accepted: bool,
    direction: String,
    status: String,
    pending_announcement: Option<Vec<u8>>,
    last_announcement_message: Option<String>,
    unread_count: i64,
    last_message_id: Option<Vec<u8>>,
    last_message_content: Option<String>,
    last_message_timestamp: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl DiscussionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner: row.get(0)?,
            contact: row.get(1)?,
            we_accepted: row.get::<_, i32>(2)? != 0,
            direction: row.get(3)?,
            status: row.get(4)?,
            pending_announcement: row.get(5)?,
            last_announcement_message: row.get(6)?,
            unread_count: row.get(7)?,
            last_message_id: row.get(8)?,
            last_message_content: row.get(9)?,
            last_message_timestamp: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_discussion(self) -> CourierResult<Discussion> {
        Ok(Discussion {
            owner_user_id: parse_user(&self.owner)?,
            contact_user_id: parse_user(&self.contact)?,
            we_accepted: self.we_accepted,
            direction: self.direction.parse()?,
            status: self.status.parse()?,
            pending_announcement: self.pending_announcement,
            last_announcement_message: self.last_announcement_message,
            unread_count: u32::try_from(self.unread_count.max(0)).unwrap_or(u32::MAX),
            last_message_id: self
                .last_message_id
                .as_deref()
                .map(parse_message_id)
                .transpose()?,
            last_message_content: self.last_message_content,
            last_message_timestamp: self.last_message_timestamp.map(timestamp),
            created_at: timestamp(self.created_at),
            updated_at: timestamp(self.updated_at),
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, owner, contact, message_id, content, serialized_content, \
     message_type, direction, status, seeker, encrypted_message, when_to_send, timestamp, \
     reply_to, forward_of";

struct MessageRow {
    id: i64,
    owner: String,
    contact: String,
    message_id: Option<Vec<u8>>,
    content: String,
    serialized_content: Option<Vec<u8>>,
    message_type: String,
    direction: String,
    status: String,
    seeker: Option<Vec<u8>>,
    encrypted_message: Option<Vec<u8>>,
    when_to_send: Option<i64>,
    timestamp: i64,
    reply_to: Option<String>,
    forward_of: Option<String>,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            contact: row.get(2)?,
            message_id: row.get(3)?,
            content: row.get(4)?,
            serialized_content: row.get(5)?,
            message_type: row.get(6)?,
            direction: row.get(7)?,
            status: row.get(8)?,
            seeker: row.get(9)?,
            encrypted_message: row.get(10)?,
            when_to_send: row.get(11)?,
            timestamp: row.get(12)?,
            reply_to: row.get(13)?,
            forward_of: row.get(14)?,
        })
    }

    fn into_message(self) -> CourierResult<Message> {
        Ok(Message {
            key: Some(MessageKey::new(self.id as u64)),
            owner_user_id: parse_user(&self.owner)?,
            contact_user_id: parse_user(&self.contact)?,
            message_id: self.message_id.as_deref().map(parse_message_id).transpose()?,
            content: self.content,
            serialized_content: self.serialized_content,
            message_type: self.message_type.parse()?,
            direction: self.direction.parse()?,
            status: self.status.parse()?,
            seeker: self.seeker.map(Seeker::new),
            encrypted_message: self.encrypted_message,
            when_to_send: self.when_to_send.map(timestamp),
            timestamp: timestamp(self.timestamp),
            reply_to: self
                .reply_to
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            forward_of: self
                .forward_of
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

/// Column values of a message that need encoding before binding
struct EncodedMessage {
    owner: String,
    contact: String,
    message_id: Option<Vec<u8>>,
    reply_to: Option<String>,
    forward_of: Option<String>,
}

impl EncodedMessage {
    fn new(message: &Message) -> CourierResult<Self> {
        Ok(Self {
            owner: message.owner_user_id.to_string(),
            contact: message.contact_user_id.to_string(),
            message_id: message.message_id.map(|id| id.as_bytes().to_vec()),
            reply_to: message.reply_to.as_ref().map(serde_json::to_string).transpose()?,
            forward_of: message
                .forward_of
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

// ----------------------------------------------------------------------------
// SQLite Store
// ----------------------------------------------------------------------------

/// Durable [`Store`] and [`SessionPersistence`] backed by SQLite
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file, creating the schema if needed
    pub fn open(path: impl AsRef<Path>) -> CourierResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).storage()?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .storage()?;
        schema::create_schema(&conn).storage()?;
        info!("Opened courier store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory database, mostly for tests
    pub fn open_in_memory() -> CourierResult<Self> {
        let conn = Connection::open_in_memory().storage()?;
        schema::create_schema(&conn).storage()?;
        debug!("Opened in-memory courier store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> CourierResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CourierError::Storage(StorageError::Poisoned))
    }
}

impl Store for SqliteStore {
    fn begin(&self) -> CourierResult<Box<dyn StoreTransaction + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE").storage()?;
        Ok(Box::new(SqliteTransaction {
            conn,
            committed: false,
        }))
    }
}

impl SessionPersistence for SqliteStore {
    fn persist_session(&self, owner: &UserId, state: &[u8]) -> CourierResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO session_state (owner, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![owner.to_string(), state, millis(Timestamp::now())],
        )
        .storage()?;
        trace!("Persisted {} bytes of session state for {}", state.len(), owner);
        Ok(())
    }

    fn load_session(&self, owner: &UserId) -> CourierResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT state FROM session_state WHERE owner = ?1",
            params![owner.to_string()],
            |row| row.get(0),
        )
        .optional()
        .storage()
    }
}

// ----------------------------------------------------------------------------
// SQLite Transaction
// ----------------------------------------------------------------------------

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl SqliteTransaction<'_> {
    fn query<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        read: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> CourierResult<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql).storage()?;
        let rows = stmt.query_map(params, read).storage()?;
        rows.collect::<rusqlite::Result<Vec<T>>>().storage()
    }

    fn query_messages(&self, sql: &str, params: impl rusqlite::Params) -> CourierResult<Vec<Message>> {
        self.query(sql, params, MessageRow::read)?
            .into_iter()
            .map(MessageRow::into_message)
            .collect()
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => trace!("SQLite transaction rolled back"),
            Err(e) => warn!("SQLite rollback failed: {}", e),
        }
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn contact(&self, owner: &UserId, user: &UserId) -> CourierResult<Option<Contact>> {
        let sql = format!(
            "SELECT {} FROM contacts WHERE owner = ?1 AND user_id = ?2",
            CONTACT_COLUMNS
        );
        self.query(&sql, params![owner.to_string(), user.to_string()], ContactRow::read)?
            .into_iter()
            .next()
            .map(ContactRow::into_contact)
            .transpose()
    }

    fn contacts(&self, owner: &UserId) -> CourierResult<Vec<Contact>> {
        let sql = format!(
            "SELECT {} FROM contacts WHERE owner = ?1 ORDER BY created_at, user_id",
            CONTACT_COLUMNS
        );
        self.query(&sql, params![owner.to_string()], ContactRow::read)?
            .into_iter()
            .map(ContactRow::into_contact)
            .collect()
    }

    fn put_contact(&mut self, contact: &Contact) -> CourierResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO contacts (owner, user_id, name, public_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    contact.owner_user_id.to_string(),
                    contact.user_id.to_string(),
                    contact.name,
                    contact.public_key,
                    millis(contact.created_at),
                ],
            )
            .storage()?;
        Ok(())
    }

    fn delete_contact(&mut self, owner: &UserId, user: &UserId) -> CourierResult<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM contacts WHERE owner = ?1 AND user_id = ?2",
                params![owner.to_string(), user.to_string()],
            )
            .storage()?;
        Ok(affected > 0)
    }

    fn discussion(&self, owner: &UserId, contact: &UserId) -> CourierResult<Option<Discussion>> {
        let sql = format!(
            "SELECT {} FROM discussions WHERE owner = ?1 AND contact = ?2",
            DISCUSSION_COLUMNS
        );
        self.query(
            &sql,
            params![owner.to_string(), contact.to_string()],
            DiscussionRow::read,
        )?
        .into_iter()
        .next()
        .map(DiscussionRow::into_discussion)
        .transpose()
    }

    fn discussions(&self, owner: &UserId) -> CourierResult<Vec<Discussion>> {
        let sql = format!(
            "SELECT {} FROM discussions WHERE owner = ?1 ORDER BY created_at, contact",
            DISCUSSION_COLUMNS
        );
        self.query(&sql, params![owner.to_string()], DiscussionRow::read)?
            .into_iter()
            .map(DiscussionRow::into_discussion)
            .collect()
    }

    fn put_discussion(&mut self, d: &Discussion) -> CourierResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO discussions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            DISCUSSION_COLUMNS
        );
        self.conn
            .execute(
                &sql,
                params![
                    d.owner_user_id.to_string(),
                    d.contact_user_id.to_string(),
                    d.we_accepted as i32,
                    d.direction.as_str(),
                    d.status.as_str(),
                    d.pending_announcement,
                    d.last_announcement_message,
                    d.unread_count as i64,
                    d.last_message_id.map(|id| id.as_bytes().to_vec()),
                    d.last_message_content,
                    d.last_message_timestamp.map(millis),
                    millis(d.created_at),
                    millis(d.updated_at),
                ],
            )
            .storage()?;
        Ok(())
    }

    fn delete_discussion(&mut self, owner: &UserId, contact: &UserId) -> CourierResult<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM discussions WHERE owner = ?1 AND contact = ?2",
                params![owner.to_string(), contact.to_string()],
            )
            .storage()?;
        Ok(affected > 0)
    }

    fn message(&self, key: MessageKey) -> CourierResult<Option<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        Ok(self
            .query_messages(&sql, params![key.value() as i64])?
            .into_iter()
            .next())
    }

    fn message_by_message_id(
        &self,
        owner: &UserId,
        contact: &UserId,
        message_id: &MessageId,
    ) -> CourierResult<Option<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE owner = ?1 AND contact = ?2 AND message_id = ?3
             ORDER BY timestamp, id LIMIT 1",
            MESSAGE_COLUMNS
        );
        Ok(self
            .query_messages(
                &sql,
                params![owner.to_string(), contact.to_string(), &message_id.as_bytes()[..]],
            )?
            .into_iter()
            .next())
    }

    fn messages_for_contact(
        &self,
        owner: &UserId,
        contact: &UserId,
        statuses: &[MessageStatus],
    ) -> CourierResult<Vec<Message>> {
        let mut values = vec![owner.to_string(), contact.to_string()];
        let mut sql = format!(
            "SELECT {} FROM messages WHERE owner = ?1 AND contact = ?2",
            MESSAGE_COLUMNS
        );
        if !statuses.is_empty() {
            let placeholders: Vec<String> = (0..statuses.len())
                .map(|i| format!("?{}", i + 3))
                .collect();
            sql.push_str(&format!(" AND status IN ({})", placeholders.join(", ")));
            values.extend(statuses.iter().map(|s| s.as_str().to_string()));
        }
        sql.push_str(" ORDER BY timestamp, id");
        self.query_messages(&sql, params_from_iter(values))
    }

    fn messages_by_status(
        &self,
        owner: &UserId,
        status: MessageStatus,
    ) -> CourierResult<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE owner = ?1 AND status = ?2 ORDER BY timestamp, id",
            MESSAGE_COLUMNS
        );
        self.query_messages(&sql, params![owner.to_string(), status.as_str()])
    }

    fn messages_by_direction_status(
        &self,
        owner: &UserId,
        direction: MessageDirection,
        status: MessageStatus,
    ) -> CourierResult<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE owner = ?1 AND direction = ?2 AND status = ?3
             ORDER BY timestamp, id",
            MESSAGE_COLUMNS
        );
        self.query_messages(
            &sql,
            params![owner.to_string(), direction.as_str(), status.as_str()],
        )
    }

    fn insert_message(&mut self, m: &Message) -> CourierResult<MessageKey> {
        let encoded = EncodedMessage::new(m)?;
        self.conn
            .execute(
                "INSERT INTO messages
                 (owner, contact, message_id, content, serialized_content, message_type,
                  direction, status, seeker, encrypted_message, when_to_send, timestamp,
                  reply_to, forward_of)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    encoded.owner,
                    encoded.contact,
                    encoded.message_id,
                    m.content,
                    m.serialized_content,
                    m.message_type.as_str(),
                    m.direction.as_str(),
                    m.status.as_str(),
                    m.seeker.as_ref().map(Seeker::as_bytes),
                    m.encrypted_message,
                    m.when_to_send.map(millis),
                    millis(m.timestamp),
                    encoded.reply_to,
                    encoded.forward_of,
                ],
            )
            .storage()?;
        Ok(MessageKey::new(self.conn.last_insert_rowid() as u64))
    }

    fn update_message(&mut self, m: &Message) -> CourierResult<()> {
        let key = m.require_key()?;
        let encoded = EncodedMessage::new(m)?;
        let affected = self
            .conn
            .execute(
                "UPDATE messages SET
                    owner = ?2, contact = ?3, message_id = ?4, content = ?5,
                    serialized_content = ?6, message_type = ?7, direction = ?8, status = ?9,
                    seeker = ?10, encrypted_message = ?11, when_to_send = ?12, timestamp = ?13,
                    reply_to = ?14, forward_of = ?15
                 WHERE id = ?1",
                params![
                    key.value() as i64,
                    encoded.owner,
                    encoded.contact,
                    encoded.message_id,
                    m.content,
                    m.serialized_content,
                    m.message_type.as_str(),
                    m.direction.as_str(),
                    m.status.as_str(),
                    m.seeker.as_ref().map(Seeker::as_bytes),
                    m.encrypted_message,
                    m.when_to_send.map(millis),
                    millis(m.timestamp),
                    encoded.reply_to,
                    encoded.forward_of,
                ],
            )
            .storage()?;
        if affected == 0 {
            return Err(CourierError::corrupt(format!("message {} does not exist", key)));
        }
        Ok(())
    }

    fn delete_messages_for_contact(
        &mut self,
        owner: &UserId,
        contact: &UserId,
    ) -> CourierResult<usize> {
        self.conn
            .execute(
                "DELETE FROM messages WHERE owner = ?1 AND contact = ?2",
                params![owner.to_string(), contact.to_string()],
            )
            .storage()
    }

    fn delete_messages_where(
        &mut self,
        owner: &UserId,
        message_type: MessageType,
        status: MessageStatus,
    ) -> CourierResult<usize> {
        self.conn
            .execute(
                "DELETE FROM messages WHERE owner = ?1 AND message_type = ?2 AND status = ?3",
                params![owner.to_string(), message_type.as_str(), status.as_str()],
            )
            .storage()
    }

    fn announcement_cursor(&self, owner: &UserId) -> CourierResult<Option<u64>> {
        let position: Option<i64> = self
            .conn
            .query_row(
                "SELECT position FROM announcement_cursors WHERE owner = ?1",
                params![owner.to_string()],
                |row| row.get(0),
            )
            .optional()
            .storage()?;
        Ok(position.map(|p| p.max(0) as u64))
    }

    fn set_announcement_cursor(&mut self, owner: &UserId, cursor: u64) -> CourierResult<()> {
        self.conn
            .execute(
                "INSERT INTO announcement_cursors (owner, position) VALUES (?1, ?2)
                 ON CONFLICT(owner) DO UPDATE SET position = excluded.position",
                params![owner.to_string(), cursor as i64],
            )
            .storage()?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> CourierResult<()> {
        let mut tx = self;
        tx.conn.execute_batch("COMMIT").storage()?;
        tx.committed = true;
        trace!("SQLite transaction committed");
        Ok(())
    }
}
