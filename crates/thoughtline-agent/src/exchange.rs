//! One request/response lifecycle: open the proxied stream, decode it,
//! split inline reasoning, accumulate drafts and finalize a message.
//!
//! `Idle → Sending → Streaming → (Completing | Aborting | Failing) → Idle`

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thoughtline_core::{ChatMessage, ProviderKind, TokenUsage};
use thoughtline_stream::{
    read_sse, DeltaDecoder, Flow, ReadOutcome, SseRecord, TagSet, ThoughtChainSplitter,
    UpstreamError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{usage_option_rejected, ChatRequest, ProviderError};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeState {
    Idle,
    Sending,
    Streaming,
    Completing,
    Aborting,
    Failing,
}

/// Live progress of an exchange, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeUpdate {
    State(ExchangeState),
    /// Answer text appended to the content draft.
    Content(String),
    /// Reasoning text appended to the thinking draft.
    Thinking(String),
    /// Running usage after a merge.
    Usage(TokenUsage),
    /// Drafts were discarded; the request is being sent again.
    Retrying { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("an exchange is already running for conversation {0}")]
    Busy(String),

    #[error("{0}")]
    Upstream(UpstreamError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("generation stopped")]
    Stopped,
}

impl ExchangeError {
    /// Short error code string for JSON error bodies and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Validation { .. } => "VALIDATION",
            ExchangeError::Busy(_) => "BUSY",
            ExchangeError::Upstream(_) => "UPSTREAM_ERROR",
            ExchangeError::Transport(_) => "TRANSPORT_ERROR",
            ExchangeError::Stopped => "STOPPED",
        }
    }
}

impl From<ProviderError> for ExchangeError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Api { status, message } => {
                ExchangeError::Upstream(UpstreamError::new(Some(status), message))
            }
            other => ExchangeError::Transport(other.to_string()),
        }
    }
}

/// Result of a finished exchange. A message is present whenever any text
/// was produced, including on stop or failure.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub message: Option<ChatMessage>,
    pub error: Option<ExchangeError>,
    pub usage: TokenUsage,
    /// The usage option was rejected and the request was sent a second time.
    pub retried: bool,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Optional sink for live updates. A dropped receiver is ignored.
#[derive(Clone, Default)]
pub struct Updates(Option<mpsc::UnboundedSender<ExchangeUpdate>>);

impl Updates {
    pub fn new(tx: mpsc::UnboundedSender<ExchangeUpdate>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    fn send(&self, update: ExchangeUpdate) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(update);
        }
    }
}

/// Runs exchanges, at most one in flight per conversation.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    tags: TagSet,
    /// Cancellation tokens of running exchanges, keyed by conversation id.
    active: DashMap<String, CancellationToken>,
}

/// A claimed conversation slot. The in-flight entry is removed when the
/// slot is dropped, however the exchange ends.
pub struct ExchangeSlot<'a> {
    active: &'a DashMap<String, CancellationToken>,
    key: String,
    cancel: CancellationToken,
}

impl ExchangeSlot<'_> {
    pub fn conversation_id(&self) -> &str {
        &self.key
    }
}

impl Drop for ExchangeSlot<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, tags: TagSet) -> Self {
        Self {
            transport,
            tags,
            active: DashMap::new(),
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active.contains_key(conversation_id)
    }

    /// Cancel the running exchange for a conversation. Returns false when
    /// nothing was running.
    pub fn stop(&self, conversation_id: &str) -> bool {
        match self.active.get(conversation_id) {
            Some(token) => {
                token.cancel();
                info!(conversation = %conversation_id, "exchange stop requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every running exchange; returns the affected conversation ids.
    pub fn stop_all(&self) -> Vec<String> {
        self.active
            .iter()
            .map(|entry| {
                entry.value().cancel();
                entry.key().clone()
            })
            .collect()
    }

    /// Reject requests that cannot possibly succeed, before anything is sent.
    pub fn validate(request: &ChatRequest) -> Result<(), ExchangeError> {
        let s = &request.settings;
        let required = [
            ("baseUrl", s.base_url.as_str(), "base URL is required"),
            ("apiKey", s.api_key.as_str(), "API key is required"),
            ("model", s.model.as_str(), "model is required"),
            ("prompt", request.prompt().unwrap_or_default(), "prompt is empty"),
        ];
        for (field, value, message) in required {
            if value.trim().is_empty() {
                return Err(ExchangeError::Validation {
                    field,
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run one exchange to completion.
    ///
    /// Only validation and busy conditions are returned as `Err`; every
    /// failure after sending is reported through `ExchangeOutcome::error`
    /// together with whatever text was already produced.
    pub async fn run(
        &self,
        conversation_id: &str,
        request: ChatRequest,
        updates: Updates,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        Self::validate(&request)?;
        let slot = self.begin(conversation_id)?;
        Ok(self.run_in(slot, request, updates).await)
    }

    /// Claim the conversation for one exchange, or fail with `Busy` when
    /// another exchange holds it. Stop requests reach the slot from here on.
    pub fn begin(&self, conversation_id: &str) -> Result<ExchangeSlot<'_>, ExchangeError> {
        let cancel = CancellationToken::new();
        match self.active.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => return Err(ExchangeError::Busy(conversation_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        Ok(ExchangeSlot {
            active: &self.active,
            key: conversation_id.to_string(),
            cancel,
        })
    }

    /// Run an exchange on a slot obtained from [`Orchestrator::begin`].
    /// The request is expected to have passed [`Orchestrator::validate`].
    pub async fn run_in(
        &self,
        slot: ExchangeSlot<'_>,
        request: ChatRequest,
        updates: Updates,
    ) -> ExchangeOutcome {
        let conversation_id = slot.conversation_id();
        let cancel = &slot.cancel;

        let mut request = request;
        let mut retried = false;
        loop {
            let attempt = self.attempt(&request, cancel, &updates).await;

            let retry = !retried
                && request.settings.provider == ProviderKind::OpenAi
                && request.settings.include_usage
                && attempt
                    .error
                    .as_ref()
                    .is_some_and(|e| usage_option_rejected(&e.to_string()));
            if retry {
                let reason = attempt
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                warn!(conversation = %conversation_id, reason = %reason, "usage option rejected, retrying without it");
                request.settings.include_usage = false;
                retried = true;
                updates.send(ExchangeUpdate::Retrying { reason });
                continue;
            }

            let outcome = attempt.finish(retried, &updates);
            info!(
                conversation = %conversation_id,
                ok = outcome.is_success(),
                retried,
                tokens_in = outcome.usage.input_tokens.unwrap_or(0),
                tokens_out = outcome.usage.output_tokens.unwrap_or(0),
                "exchange finished"
            );
            return outcome;
        }
    }

    async fn attempt(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        updates: &Updates,
    ) -> Attempt {
        let mut drafts = Drafts::new(request.settings.provider, self.tags.clone());

        updates.send(ExchangeUpdate::State(ExchangeState::Sending));
        let proxy_request = request.to_proxy_request();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return drafts.end(Some(ExchangeError::Stopped), updates),
            opened = self.transport.open(&proxy_request) => opened,
        };
        let body = match opened {
            Ok(body) => body,
            Err(e) => return drafts.end(Some(e.into()), updates),
        };

        updates.send(ExchangeUpdate::State(ExchangeState::Streaming));
        let mut upstream_error: Option<UpstreamError> = None;
        let read = read_sse(body, cancel, |record| {
            if record.is_event("error") {
                let err = UpstreamError::parse(&record.data);
                warn!(status = ?err.status, message = %err.message, "upstream error event");
                upstream_error = Some(err);
                return Flow::Stop;
            }
            drafts.apply(&record, updates)
        })
        .await;

        let error = match (upstream_error, read) {
            (Some(e), _) => Some(ExchangeError::Upstream(e)),
            (None, Ok(ReadOutcome::Cancelled)) => Some(ExchangeError::Stopped),
            (None, Ok(ReadOutcome::Ended | ReadOutcome::Stopped)) => None,
            (None, Err(e)) => Some(ExchangeError::Transport(e.to_string())),
        };
        drafts.end(error, updates)
    }
}

/// Per-attempt parsing state and accumulated text.
struct Drafts {
    decoder: DeltaDecoder,
    splitter: ThoughtChainSplitter,
    content: String,
    thinking: String,
    usage: TokenUsage,
}

impl Drafts {
    fn new(provider: ProviderKind, tags: TagSet) -> Self {
        Self {
            decoder: DeltaDecoder::new(provider),
            splitter: ThoughtChainSplitter::new(tags),
            content: String::new(),
            thinking: String::new(),
            usage: TokenUsage::default(),
        }
    }

    fn apply(&mut self, record: &SseRecord, updates: &Updates) -> Flow {
        let delta = self.decoder.decode(record);

        self.push_thinking(&delta.thinking_delta, updates);
        if !delta.content_delta.is_empty() {
            let split = self.splitter.push(&delta.content_delta);
            self.push_content(&split.content, updates);
            self.push_thinking(&split.thinking, updates);
        }
        if let Some(usage) = &delta.usage {
            self.usage.merge(usage);
            updates.send(ExchangeUpdate::Usage(self.usage));
        }

        if delta.done {
            debug!("provider signalled end of stream");
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn push_content(&mut self, text: &str, updates: &Updates) {
        if !text.is_empty() {
            self.content.push_str(text);
            updates.send(ExchangeUpdate::Content(text.to_string()));
        }
    }

    fn push_thinking(&mut self, text: &str, updates: &Updates) {
        if !text.is_empty() {
            self.thinking.push_str(text);
            updates.send(ExchangeUpdate::Thinking(text.to_string()));
        }
    }

    /// Flush the splitter and close the attempt.
    fn end(mut self, error: Option<ExchangeError>, updates: &Updates) -> Attempt {
        let rest = self.splitter.flush();
        self.push_content(&rest.content, updates);
        self.push_thinking(&rest.thinking, updates);

        let terminal = match &error {
            None | Some(ExchangeError::Upstream(_)) => ExchangeState::Completing,
            Some(ExchangeError::Stopped) => ExchangeState::Aborting,
            Some(_) => ExchangeState::Failing,
        };
        Attempt {
            content: self.content,
            thinking: self.thinking,
            usage: self.usage,
            terminal,
            error,
        }
    }
}

struct Attempt {
    content: String,
    thinking: String,
    usage: TokenUsage,
    terminal: ExchangeState,
    error: Option<ExchangeError>,
}

impl Attempt {
    fn finish(self, retried: bool, updates: &Updates) -> ExchangeOutcome {
        updates.send(ExchangeUpdate::State(self.terminal));

        let content = self.content.trim();
        let thinking = self.thinking.trim();
        let message = (!content.is_empty() || !thinking.is_empty()).then(|| {
            ChatMessage::assistant(content, Some(thinking.to_string()), Some(self.usage))
        });

        updates.send(ExchangeUpdate::State(ExchangeState::Idle));
        ExchangeOutcome {
            message,
            error: self.error,
            usage: self.usage,
            retried,
        }
    }
}
