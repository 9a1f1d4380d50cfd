use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thoughtline_core::ProxyRequest;
use tracing::{debug, warn};

use crate::provider::ProviderError;

/// Streaming response body handed to the SSE reader.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Opens the streaming HTTP request for one exchange attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the body once a 2xx status arrives.
    /// Non-2xx responses are reported as `ProviderError::Api`.
    async fn open(&self, req: &ProxyRequest) -> Result<ByteStream, ProviderError>;
}

/// Talks to the gateway's `POST /api/proxy`.
pub struct ProxyTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl ProxyTransport {
    pub fn new(proxy_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/proxy", proxy_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    async fn open(&self, req: &ProxyRequest) -> Result<ByteStream, ProviderError> {
        debug!(provider = %req.provider, endpoint = %self.endpoint, "opening proxy stream");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("accept", "text/event-stream")
            .json(req)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "proxy rejected request");
            return Err(ProviderError::Api {
                status,
                message: error_message(&text),
            });
        }

        Ok(Box::pin(
            resp.bytes_stream().map(|chunk| chunk.map_err(ProviderError::from)),
        ))
    }
}

/// Pull `error` (string or `{message}`) out of a JSON error body, else use
/// the body text.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .as_str()
            .or_else(|| error.get("message").and_then(|m| m.as_str()))
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            ProxyTransport::new("http://127.0.0.1:8787/").endpoint(),
            "http://127.0.0.1:8787/api/proxy"
        );
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(error_message(r#"{"error":"baseUrl must use https"}"#), "baseUrl must use https");
        assert_eq!(error_message(r#"{"error":{"message":"nope"}}"#), "nope");
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }
}
