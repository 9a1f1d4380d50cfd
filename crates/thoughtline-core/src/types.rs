use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a chat message (UUIDv7, time-sortable, so message
/// ids order the same way the messages were created).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Which upstream wire protocol an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Path appended to the configured base URL (which may or may not already
    /// end in `/v1`).
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "/chat/completions",
            ProviderKind::Anthropic => "/messages",
        }
    }

    /// Parse from a string slug. Case-insensitive.
    ///
    /// Accepted values: `"openai"`, `"anthropic"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => f.write_str("openai"),
            ProviderKind::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// Token accounting for one exchange.
///
/// Streams report usage piecemeal (Anthropic sends input tokens in
/// `message_start` and output tokens in `message_delta`; OpenAI sends one
/// usage object on the final chunk). `merge` folds those patches together:
/// once a field has been observed it only ever moves up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none() && self.total_tokens.is_none()
    }

    /// Fold `patch` into `self` with max() semantics per field.
    ///
    /// An explicit `total_tokens` from upstream is kept (and also only grows);
    /// otherwise the total is re-derived from input + output after every merge.
    pub fn merge(&mut self, patch: &TokenUsage) {
        self.input_tokens = max_opt(self.input_tokens, patch.input_tokens);
        self.output_tokens = max_opt(self.output_tokens, patch.output_tokens);
        self.total_tokens = max_opt(self.total_tokens, patch.total_tokens);
        let derived = self.derived_total();
        self.total_tokens = max_opt(self.total_tokens, derived);
    }

    /// Total token count: explicit total if known, else input + output.
    pub fn total(&self) -> Option<u64> {
        self.total_tokens.or_else(|| self.derived_total())
    }

    fn derived_total(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (i, o) => Some(i.unwrap_or(0).saturating_add(o.unwrap_or(0))),
        }
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// A single finished message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Reasoning text the model emitted alongside the answer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            thinking: None,
            usage: None,
            at: Utc::now(),
        }
    }

    /// Build an assistant message from finished drafts. Empty thinking and
    /// empty usage are dropped rather than stored as empty values.
    pub fn assistant(content: impl Into<String>, thinking: Option<String>, usage: Option<TokenUsage>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: content.into(),
            thinking: thinking.filter(|t| !t.trim().is_empty()),
            usage: usage.filter(|u| !u.is_empty()),
            at: Utc::now(),
        }
    }
}

/// Body of `POST /api/proxy`: what the browser (or CLI) asks the gateway to
/// forward. The API key travels to the same-origin gateway only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub provider: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    /// Provider-native request body, forwarded verbatim.
    pub body: serde_json::Value,
}
