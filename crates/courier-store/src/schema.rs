//! SQLite schema for the Courier store

use rusqlite::Connection;

/// Stored in `PRAGMA user_version` after the schema is created
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS contacts (
        owner       TEXT NOT NULL,
        user_id     TEXT NOT NULL,
        name        TEXT NOT NULL,
        public_key  BLOB NOT NULL,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (owner, user_id)
    );

    CREATE TABLE IF NOT EXISTS discussions (
        owner                       TEXT NOT NULL,
        contact                     TEXT NOT NULL,
        we_accepted                 INTEGER NOT NULL DEFAULT 0,
        direction                   TEXT NOT NULL,
        status                      TEXT NOT NULL,
        pending_announcement        BLOB,
        last_announcement_message   TEXT,
        unread_count                INTEGER NOT NULL DEFAULT 0,
        last_message_id             BLOB,
        last_message_content        TEXT,
        last_message_timestamp      INTEGER,
        created_at                  INTEGER NOT NULL,
        updated_at                  INTEGER NOT NULL,
        PRIMARY KEY (owner, contact)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        owner               TEXT NOT NULL,
        contact             TEXT NOT NULL,
        message_id          BLOB,
        content             TEXT NOT NULL,
        serialized_content  BLOB,
        message_type        TEXT NOT NULL,
        direction           TEXT NOT NULL,
        status              TEXT NOT NULL,
        seeker              BLOB,
        encrypted_message   BLOB,
        when_to_send        INTEGER,
        timestamp           INTEGER NOT NULL,
        reply_to            TEXT,
        forward_of          TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(owner, contact, timestamp);
    CREATE INDEX IF NOT EXISTS idx_messages_message_id
        ON messages(owner, contact, message_id);
    CREATE INDEX IF NOT EXISTS idx_messages_status
        ON messages(owner, status);
    CREATE INDEX IF NOT EXISTS idx_messages_direction_status
        ON messages(owner, direction, status);

    CREATE TABLE IF NOT EXISTS announcement_cursors (
        owner       TEXT PRIMARY KEY,
        position    INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS session_state (
        owner       TEXT PRIMARY KEY,
        state       BLOB NOT NULL,
        updated_at  INTEGER NOT NULL
    );
";

/// Create every table and index if missing
pub(crate) fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))
}
