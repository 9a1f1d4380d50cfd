use thoughtline_core::TokenUsage;

/// The increment one SSE record contributes to an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaResult {
    pub content_delta: String,
    pub thinking_delta: String,
    pub usage: Option<TokenUsage>,
    /// The provider signalled end-of-stream; no further records matter.
    pub done: bool,
}

impl DeltaResult {
    /// No-op increment (keep-alives, bookkeeping events, unparseable payloads).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content_delta.is_empty()
            && self.thinking_delta.is_empty()
            && self.usage.is_none()
            && !self.done
    }
}
