use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversations and messages tables.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS conversations (
            id            TEXT PRIMARY KEY,
            title         TEXT NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at DESC);
        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL
                            REFERENCES conversations(id) ON DELETE CASCADE,
            message_id      TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            thinking        TEXT,
            usage           TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE (conversation_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, seq);",
    )?;
    Ok(())
}
