use rusqlite::Connection;

use crate::error::Result;

/// Initialise the store schema. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id  TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL,
            sequence    INTEGER NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            timestamp   TEXT NOT NULL,
            partial     INTEGER NOT NULL DEFAULT 0,
            UNIQUE(session_id, sequence)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, sequence);",
    )?;
    Ok(())
}
