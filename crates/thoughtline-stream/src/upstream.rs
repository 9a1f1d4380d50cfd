use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Payload of an `event: error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Parse error-event data. Accepts `{status?, message}`, the provider
    /// shapes `{error: {message}}` / `{error: "..."}`, and falls back to the
    /// raw text as the message.
    pub fn parse(data: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return Self::new(None, data.trim());
        };

        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());

        let message = value
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| {
                let error = value.get("error")?;
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| error.as_str())
            })
            .map(str::to_string)
            .unwrap_or_else(|| data.trim().to_string());

        Self::new(status, message)
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "upstream error {}: {}", status, self.message),
            None => write!(f, "upstream error: {}", self.message),
        }
    }
}
