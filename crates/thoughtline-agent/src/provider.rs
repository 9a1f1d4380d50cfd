use serde::{Deserialize, Serialize};
use thoughtline_core::config::ClientConfig;
use thoughtline_core::{ChatMessage, ProviderKind, ProxyRequest, Role};

/// Request option names an upstream may reject when it does not support
/// trailing usage chunks.
const USAGE_OPTION_NAMES: [&str; 2] = ["stream_options", "include_usage"];

/// Endpoint and generation settings for one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    /// Ask OpenAI-compatible upstreams for a final usage chunk.
    pub include_usage: bool,
}

impl ChatSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            provider: config.provider,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system: config.system_prompt.clone().filter(|s| !s.trim().is_empty()),
            max_tokens: config.max_tokens,
            include_usage: config.include_usage,
        }
    }
}

/// A single message in the conversation history as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for Message {
    /// Only the answer text is re-sent; stored reasoning stays local.
    fn from(m: &ChatMessage) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

/// Request to an LLM provider, routed through the gateway.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub settings: ChatSettings,
    pub messages: Vec<Message>,
}

impl ChatRequest {
    pub fn new(settings: ChatSettings, messages: Vec<Message>) -> Self {
        Self { settings, messages }
    }

    /// The most recent user turn, which is what the exchange answers.
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Provider-native streaming request body.
    pub fn build_body(&self) -> serde_json::Value {
        let s = &self.settings;
        match s.provider {
            ProviderKind::OpenAi => {
                // OpenAI uses a flat messages array; system is prepended as a system message.
                let mut messages = Vec::with_capacity(self.messages.len() + 1);
                if let Some(system) = &s.system {
                    messages.push(serde_json::json!({ "role": "system", "content": system }));
                }
                for m in &self.messages {
                    messages.push(serde_json::json!({ "role": m.role, "content": m.content }));
                }

                let mut body = serde_json::json!({
                    "model": s.model,
                    "messages": messages,
                    "max_tokens": s.max_tokens,
                    "stream": true,
                });
                if s.include_usage {
                    body["stream_options"] = serde_json::json!({ "include_usage": true });
                }
                body
            }
            ProviderKind::Anthropic => {
                // Anthropic takes system as a top-level field, not a message.
                let messages: Vec<serde_json::Value> = self
                    .messages
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
                    .collect();

                let mut body = serde_json::json!({
                    "model": s.model,
                    "messages": messages,
                    "max_tokens": s.max_tokens,
                    "stream": true,
                });
                if let Some(system) = &s.system {
                    body["system"] = serde_json::json!(system);
                }
                body
            }
        }
    }

    pub fn to_proxy_request(&self) -> ProxyRequest {
        ProxyRequest {
            provider: self.settings.provider,
            base_url: self.settings.base_url.trim().to_string(),
            api_key: self.settings.api_key.trim().to_string(),
            body: self.build_body(),
        }
    }
}

/// True when an upstream error message blames the usage-reporting option.
pub fn usage_option_rejected(message: &str) -> bool {
    let lower = message.to_lowercase();
    USAGE_OPTION_NAMES.iter().any(|name| lower.contains(name))
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}
