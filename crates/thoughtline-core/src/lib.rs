pub mod config;
pub mod error;
pub mod types;

pub use config::ThoughtlineConfig;
pub use error::{Result, ThoughtlineError};
pub use types::{ChatMessage, ProviderKind, ProxyRequest, Role, TokenUsage};
