use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use thoughtline_core::types::MessageId;
use thoughtline_core::{ChatMessage, Role, TokenUsage};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{ConversationError, Result};
use crate::types::{Conversation, ConversationExport, EXPORT_VERSION};

/// Thread-safe store for conversations and their messages.
///
/// Wraps a single SQLite connection in a `Mutex`; exchanges persist at most
/// two rows per turn, so contention is negligible.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Open (creating if needed) the database file and its schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        info!(path = %path, "conversation store ready");
        Ok(Self::new(conn))
    }

    /// Fresh private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| ConversationError::LockPoisoned)
    }

    #[instrument(skip(self))]
    pub fn create(&self, title: &str) -> Result<Conversation> {
        let id = Uuid::now_v7().to_string();
        let now = now();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO conversations (id, title, message_count, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            rusqlite::params![id, title, now],
        )?;
        debug!(id = %id, "conversation created");
        Ok(Conversation {
            id,
            title: title.to_string(),
            created_at: now.clone(),
            updated_at: now,
            message_count: 0,
        })
    }

    /// Retrieve a conversation, returning `None` if it does not exist.
    #[instrument(skip(self))]
    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let db = self.conn()?;
        let conversation = db
            .query_row(
                "SELECT id, title, created_at, updated_at, message_count
                 FROM conversations WHERE id = ?1",
                rusqlite::params![id],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Most recently updated conversations first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: usize) -> Result<Vec<Conversation>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, title, created_at, updated_at, message_count
             FROM conversations
             ORDER BY updated_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_conversation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self))]
    pub fn rename(&self, id: &str, title: &str) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now(), id],
        )?;
        if changed == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Delete a conversation and, via the foreign key cascade, its messages.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute(
            "DELETE FROM conversations WHERE id = ?1",
            rusqlite::params![id],
        )?;
        if changed == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Append a message and bump the conversation's count and `updated_at`.
    #[instrument(skip(self, message), fields(role = %message.role))]
    pub fn append_message(&self, id: &str, message: &ChatMessage) -> Result<()> {
        let usage = encode_usage(message.usage.as_ref())?;
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let changed = tx.execute(
            "UPDATE conversations
             SET message_count = message_count + 1,
                 updated_at    = ?1
             WHERE id = ?2",
            rusqlite::params![now(), id],
        )?;
        if changed == 0 {
            return Err(not_found(id));
        }
        insert_message(&tx, id, message, usage.as_deref())?;

        tx.commit()?;
        Ok(())
    }

    /// All messages of a conversation in the order they were appended.
    #[instrument(skip(self))]
    pub fn messages(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT message_id, role, content, thinking, usage, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![id], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self))]
    pub fn export(&self, id: &str) -> Result<ConversationExport> {
        let conversation = self.get(id)?.ok_or_else(|| not_found(id))?;
        let messages = self.messages(id)?;
        Ok(ConversationExport {
            version: EXPORT_VERSION,
            conversation,
            messages,
        })
    }

    /// Import an export under a freshly allocated id. Message contents, ids
    /// and timestamps are kept.
    #[instrument(skip(self, export), fields(title = %export.conversation.title))]
    pub fn import(&self, export: &ConversationExport) -> Result<Conversation> {
        if export.version != EXPORT_VERSION {
            return Err(ConversationError::UnsupportedVersion {
                found: export.version,
                expected: EXPORT_VERSION,
            });
        }

        let id = Uuid::now_v7().to_string();
        let now = now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        tx.execute(
            "INSERT INTO conversations (id, title, message_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![
                id,
                export.conversation.title,
                export.messages.len() as i64,
                now
            ],
        )?;
        for message in &export.messages {
            let usage = encode_usage(message.usage.as_ref())?;
            insert_message(&tx, &id, message, usage.as_deref())?;
        }
        tx.commit()?;

        info!(id = %id, messages = export.messages.len(), "conversation imported");
        Ok(Conversation {
            id,
            title: export.conversation.title.clone(),
            created_at: now.clone(),
            updated_at: now,
            message_count: export.messages.len() as u32,
        })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn not_found(id: &str) -> ConversationError {
    ConversationError::NotFound { id: id.to_string() }
}

fn encode_usage(usage: Option<&TokenUsage>) -> Result<Option<String>> {
    Ok(match usage {
        Some(u) => Some(serde_json::to_string(u)?),
        None => None,
    })
}

fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    message: &ChatMessage,
    usage: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO messages
         (conversation_id, message_id, role, content, thinking, usage, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            conversation_id,
            message.id.as_str(),
            message.role.to_string(),
            message.content,
            message.thinking,
            usage,
            message.at.to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    )?;
    Ok(())
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        message_count: u32::try_from(row.get::<_, i64>(4)?)
            .map_err(|e| conversion_error(4, Type::Integer, Box::new(e)))?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id: String = row.get(0)?;
    let role: String = row.get(1)?;
    let usage: Option<String> = row.get(4)?;
    let at: String = row.get(5)?;

    let role = role.parse::<Role>().map_err(|e| conversion_error(1, Type::Text, e.into()))?;
    let usage = usage
        .map(|u| serde_json::from_str::<TokenUsage>(&u))
        .transpose()
        .map_err(|e| conversion_error(4, Type::Text, Box::new(e)))?;
    let at = DateTime::parse_from_rfc3339(&at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(5, Type::Text, Box::new(e)))?;

    Ok(ChatMessage {
        id: MessageId(id),
        role,
        content: row.get(2)?,
        thinking: row.get(3)?,
        usage,
        at,
    })
}

fn conversion_error(
    column: usize,
    ty: Type,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, err)
}
