//! POST /api/proxy: forward a chat request to the user's upstream and relay
//! its SSE stream back.
//!
//! Upstream failures never surface as HTTP errors once the request passed
//! validation: they are delivered as a single `event: error` frame carrying
//! `{status, message}`, so clients only ever parse one wire format.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thoughtline_core::{ProviderKind, ProxyRequest};
use thoughtline_stream::{SseDecoder, SseRecord, UpstreamError};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::AppState;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Raw upstream error bodies are cut to this many characters.
const MAX_ERROR_CHARS: usize = 1000;

type HandlerError = (StatusCode, Json<Value>);

pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProxyRequest>,
) -> Result<Response, HandlerError> {
    let base = state.policy.check(&req.base_url).map_err(|e| {
        warn!(base_url = %req.base_url, error = %e, "proxy request rejected");
        bad_request(&e.to_string())
    })?;
    let api_key = req.api_key.trim();
    if api_key.is_empty() {
        return Err(bad_request("apiKey is required"));
    }

    let endpoint = upstream_endpoint(&base, req.provider);
    let keep_alive = Duration::from_secs(state.config.proxy.keep_alive_secs.max(1));
    let timeout = Duration::from_secs(state.config.proxy.request_timeout_secs);
    info!(provider = %req.provider, endpoint = %endpoint, "proxying stream");

    let builder = state
        .client
        .post(&endpoint)
        .header(header::ACCEPT, "text/event-stream")
        .json(&req.body);
    let builder = match req.provider {
        ProviderKind::OpenAi => builder.bearer_auth(api_key),
        ProviderKind::Anthropic => builder
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION),
    };

    let resp = match tokio::time::timeout(timeout, builder.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            warn!(error = %e, "upstream request failed");
            let err = UpstreamError::new(Some(502), format!("upstream request failed: {e}"));
            return Ok(error_stream(err, keep_alive));
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "upstream did not respond in time");
            let err = UpstreamError::new(Some(504), "upstream did not respond in time");
            return Ok(error_stream(err, keep_alive));
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let err = upstream_failure(status, &text);
        warn!(status = status.as_u16(), message = %err.message, "upstream rejected request");
        return Ok(error_stream(err, keep_alive));
    }

    Ok(relay_stream(resp, keep_alive))
}

/// `{base}/v1/chat/completions` or `{base}/v1/messages`; a base that already
/// ends in `/v1` is not given a second one.
pub fn upstream_endpoint(base: &Url, provider: ProviderKind) -> String {
    let base = base.as_str().trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{}{}", base, provider.endpoint_path())
    } else {
        format!("{}/v1{}", base, provider.endpoint_path())
    }
}

fn bad_request(message: &str) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn upstream_failure(status: StatusCode, body: &str) -> UpstreamError {
    let parsed = UpstreamError::parse(body);
    let message = if parsed.message.is_empty() {
        status.canonical_reason().unwrap_or("upstream error").to_string()
    } else if parsed.message.chars().count() > MAX_ERROR_CHARS {
        let mut cut: String = parsed.message.chars().take(MAX_ERROR_CHARS).collect();
        cut.push('…');
        cut
    } else {
        parsed.message
    };
    UpstreamError::new(Some(status.as_u16()), message)
}

fn relay_stream(resp: reqwest::Response, keep_alive: Duration) -> Response {
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut upstream = Box::pin(resp.bytes_stream());
        let mut frames = 0usize;
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    for record in decoder.push_bytes(&bytes) {
                        frames += 1;
                        yield Ok::<Event, Infallible>(to_event(record));
                    }
                }
                Err(e) => {
                    warn!(error = %e, frames, "upstream stream failed");
                    let err = UpstreamError::new(None, format!("upstream stream failed: {e}"));
                    yield Ok::<Event, Infallible>(error_event(&err));
                    break;
                }
            }
        }
        debug!(frames, "upstream stream finished");
    };
    sse(stream, keep_alive)
}

fn error_stream(err: UpstreamError, keep_alive: Duration) -> Response {
    let stream = futures_util::stream::iter(vec![Ok::<Event, Infallible>(error_event(&err))]);
    sse(stream, keep_alive)
}

fn sse<S>(stream: S, keep_alive: Duration) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
        .into_response()
}

fn to_event(record: SseRecord) -> Event {
    let mut event = Event::default();
    if let Some(name) = record.event.as_deref().filter(|n| !n.is_empty()) {
        event = event.event(name);
    }
    // axum rejects ids containing NUL; such ids are ignored on the wire anyway.
    if let Some(id) = record.id.as_deref().filter(|i| !i.is_empty() && !i.contains('\0')) {
        event = event.id(id);
    }
    event.data(record.data)
}

fn error_event(err: &UpstreamError) -> Event {
    let data = serde_json::to_string(err).unwrap_or_default();
    Event::default().event("error").data(data)
}
