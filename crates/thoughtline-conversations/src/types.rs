use serde::{Deserialize, Serialize};
use thoughtline_core::ChatMessage;

/// Format version written into every export file.
pub const EXPORT_VERSION: u32 = 1;

/// A stored conversation. Timestamps are RFC 3339 strings as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: u32,
}

/// Portable snapshot of one conversation and its messages, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub version: u32,
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}
