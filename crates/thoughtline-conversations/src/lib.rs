pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::ConversationError;
pub use manager::ConversationStore;
pub use types::{Conversation, ConversationExport, EXPORT_VERSION};
