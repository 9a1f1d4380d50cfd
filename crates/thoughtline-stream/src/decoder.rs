use thoughtline_core::ProviderKind;

use crate::anthropic::{parse_anthropic_sse_data, AnthropicStreamContext};
use crate::delta::DeltaResult;
use crate::openai::parse_openai_sse_data;
use crate::sse::SseRecord;

/// Provider-specific decoder for one exchange.
#[derive(Debug, Clone)]
pub enum DeltaDecoder {
    OpenAi,
    Anthropic(AnthropicStreamContext),
}

impl DeltaDecoder {
    pub fn new(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::OpenAi => DeltaDecoder::OpenAi,
            ProviderKind::Anthropic => DeltaDecoder::Anthropic(AnthropicStreamContext::new()),
        }
    }

    pub fn decode(&mut self, record: &SseRecord) -> DeltaResult {
        match self {
            DeltaDecoder::OpenAi => parse_openai_sse_data(&record.data),
            DeltaDecoder::Anthropic(ctx) => {
                parse_anthropic_sse_data(record.event.as_deref(), &record.data, ctx)
            }
        }
    }

    pub fn reset(&mut self) {
        if let DeltaDecoder::Anthropic(ctx) = self {
            ctx.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: Option<&str>, data: &str) -> SseRecord {
        SseRecord {
            event: event.map(String::from),
            id: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn dispatches_by_provider() {
        let mut openai = DeltaDecoder::new(ProviderKind::OpenAi);
        assert!(openai.decode(&record(None, "[DONE]")).done);

        let mut anthropic = DeltaDecoder::new(ProviderKind::Anthropic);
        anthropic.decode(&record(
            Some("content_block_start"),
            r#"{"index":0,"content_block":{"type":"thinking"}}"#,
        ));
        let d = anthropic.decode(&record(
            Some("content_block_delta"),
            r#"{"index":0,"delta":{"thinking":"t"}}"#,
        ));
        assert_eq!(d.thinking_delta, "t");
    }

    #[test]
    fn reset_clears_anthropic_context() {
        let mut decoder = DeltaDecoder::new(ProviderKind::Anthropic);
        decoder.decode(&record(
            Some("content_block_start"),
            r#"{"index":0,"content_block":{"type":"thinking"}}"#,
        ));
        decoder.reset();
        let d = decoder.decode(&record(
            Some("content_block_delta"),
            r#"{"index":0,"delta":{"text":"now text"}}"#,
        ));
        assert_eq!(d.content_delta, "now text");
    }
}
