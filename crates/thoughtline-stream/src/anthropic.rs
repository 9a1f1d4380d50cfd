use std::collections::HashMap;

use serde_json::Value;
use thoughtline_core::TokenUsage;
use tracing::debug;

use crate::delta::DeltaResult;

/// Block types whose deltas are reasoning rather than answer text.
const THINKING_BLOCK_TYPES: [&str; 3] = ["thinking", "redacted_thinking", "thinking_summary"];

/// Per-exchange memory of declared content block types.
///
/// Anthropic announces a block's type once in `content_block_start` and then
/// refers to it only by index in each `content_block_delta`.
#[derive(Debug, Default, Clone)]
pub struct AnthropicStreamContext {
    block_types: HashMap<u64, String>,
}

impl AnthropicStreamContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_type(&self, index: u64) -> Option<&str> {
        self.block_types.get(&index).map(String::as_str)
    }

    pub fn reset(&mut self) {
        self.block_types.clear();
    }
}

/// Decode one Anthropic Messages stream event.
///
/// The event name comes from the SSE `event:` field when present, else from
/// the payload's `type`.
pub fn parse_anthropic_sse_data(
    event: Option<&str>,
    data: &str,
    ctx: &mut AnthropicStreamContext,
) -> DeltaResult {
    let payload: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, len = data.len(), "ignoring unparseable anthropic event");
            return DeltaResult::empty();
        }
    };

    let event_type = event
        .filter(|e| !e.is_empty())
        .or_else(|| payload.get("type").and_then(Value::as_str))
        .unwrap_or_default();

    match event_type {
        "content_block_start" => {
            let index = payload.get("index").and_then(Value::as_u64);
            let block_type = payload
                .get("content_block")
                .and_then(|b| b.get("type"))
                .and_then(Value::as_str);
            if let (Some(index), Some(block_type)) = (index, block_type) {
                ctx.block_types.insert(index, block_type.to_string());
            }
            DeltaResult::empty()
        }

        "content_block_delta" => {
            let block_type = payload
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|i| ctx.block_type(i));
            let Some(delta) = payload.get("delta") else {
                return DeltaResult::empty();
            };
            route_block_delta(block_type, delta)
        }

        "message_start" => DeltaResult {
            usage: payload
                .get("message")
                .and_then(|m| m.get("usage"))
                .or_else(|| payload.get("usage"))
                .and_then(parse_usage),
            ..DeltaResult::empty()
        },

        "message_delta" => DeltaResult {
            usage: payload.get("usage").and_then(parse_usage),
            ..DeltaResult::empty()
        },

        // ping, content_block_stop, message_stop, unknown
        _ => DeltaResult::empty(),
    }
}

fn route_block_delta(block_type: Option<&str>, delta: &Value) -> DeltaResult {
    let text = text_shaped(delta);
    let thinking = thinking_shaped(delta);

    let is_thinking_block = block_type.is_some_and(|t| THINKING_BLOCK_TYPES.contains(&t));
    if is_thinking_block {
        // Some upstreams label redacted/summary blocks but send `text`.
        let value = thinking.or(text).unwrap_or_default();
        return DeltaResult {
            thinking_delta: value.to_string(),
            ..DeltaResult::empty()
        };
    }

    DeltaResult {
        content_delta: text.unwrap_or_default().to_string(),
        thinking_delta: thinking.unwrap_or_default().to_string(),
        ..DeltaResult::empty()
    }
}

/// `{text}`, `{type: "text_delta", text}` or `{text_delta: {text}}`.
fn text_shaped(delta: &Value) -> Option<&str> {
    delta.get("text").and_then(Value::as_str).or_else(|| {
        delta
            .get("text_delta")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
    })
}

/// `{thinking}`, `{type: "thinking_delta", thinking}` or `{thinking_delta: {thinking}}`.
fn thinking_shaped(delta: &Value) -> Option<&str> {
    delta.get("thinking").and_then(Value::as_str).or_else(|| {
        delta
            .get("thinking_delta")
            .and_then(|d| d.get("thinking"))
            .and_then(Value::as_str)
    })
}

fn parse_usage(usage: &Value) -> Option<TokenUsage> {
    let parsed = TokenUsage {
        input_tokens: usage.get("input_tokens").and_then(Value::as_u64),
        output_tokens: usage.get("output_tokens").and_then(Value::as_u64),
        total_tokens: None,
    };
    (!parsed.is_empty()).then_some(parsed)
}
