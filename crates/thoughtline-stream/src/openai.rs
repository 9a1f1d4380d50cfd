use serde_json::Value;
use thoughtline_core::TokenUsage;
use tracing::debug;

use crate::delta::DeltaResult;

/// Literal end-of-stream marker OpenAI sends as a final `data:` line.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Reasoning fields seen on `choices[0].delta`, in priority order.
/// `reasoning` (OpenRouter), `reasoning_content` (DeepSeek, Qwen),
/// `thinking` (assorted compatible servers).
const REASONING_FIELDS: [&str; 3] = ["reasoning", "reasoning_content", "thinking"];

/// Decode one OpenAI-compatible chat completion chunk.
///
/// Unparseable payloads are a no-op rather than an error; some compatible
/// servers interleave non-JSON keep-alive data lines.
pub fn parse_openai_sse_data(data: &str) -> DeltaResult {
    if data.trim() == DONE_SENTINEL {
        return DeltaResult::done();
    }

    let chunk: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, len = data.len(), "ignoring unparseable openai chunk");
            return DeltaResult::empty();
        }
    };

    let choice = chunk.get("choices").and_then(|c| c.get(0));
    let delta = choice.and_then(|c| c.get("delta"));

    // Chat streaming puts text on delta.content; legacy completions use text.
    let content = delta
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.and_then(|c| c.get("text")).and_then(Value::as_str))
        .unwrap_or_default();

    let thinking = delta
        .and_then(|d| {
            REASONING_FIELDS
                .iter()
                .find_map(|field| d.get(*field).and_then(Value::as_str))
        })
        .unwrap_or_default();

    DeltaResult {
        content_delta: content.to_string(),
        thinking_delta: thinking.to_string(),
        usage: chunk.get("usage").and_then(parse_usage),
        done: false,
    }
}

fn parse_usage(usage: &Value) -> Option<TokenUsage> {
    if !usage.is_object() {
        return None;
    }
    let parsed = TokenUsage {
        input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        output_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    };
    (!parsed.is_empty()).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_terminates_without_deltas() {
        let result = parse_openai_sse_data("[DONE]");
        assert!(result.done);
        assert_eq!(result.content_delta, "");
        assert_eq!(result.thinking_delta, "");
    }

    #[test]
    fn malformed_json_is_a_no_op() {
        let result = parse_openai_sse_data("{not json");
        assert!(!result.done);
        assert!(result.is_empty());
    }

    #[test]
    fn content_delta() {
        let result = parse_openai_sse_data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(result.content_delta, "Hel");
        assert_eq!(result.thinking_delta, "");
        assert!(result.usage.is_none());
    }

    #[test]
    fn legacy_text_fallback() {
        let result = parse_openai_sse_data(r#"{"choices":[{"text":"old style","index":0}]}"#);
        assert_eq!(result.content_delta, "old style");
    }

    #[test]
    fn null_content_falls_back_to_text() {
        let result = parse_openai_sse_data(r#"{"choices":[{"delta":{"content":null},"text":"t"}]}"#);
        assert_eq!(result.content_delta, "t");
    }

    #[test]
    fn reasoning_field_priority() {
        let result = parse_openai_sse_data(
            r#"{"choices":[{"delta":{"thinking":"c","reasoning_content":"b","reasoning":"a"}}]}"#,
        );
        assert_eq!(result.thinking_delta, "a");

        let result = parse_openai_sse_data(
            r#"{"choices":[{"delta":{"thinking":"c","reasoning_content":"b"}}]}"#,
        );
        assert_eq!(result.thinking_delta, "b");

        let result = parse_openai_sse_data(r#"{"choices":[{"delta":{"thinking":"c"}}]}"#);
        assert_eq!(result.thinking_delta, "c");
    }

    #[test]
    fn non_string_reasoning_is_skipped() {
        let result = parse_openai_sse_data(
            r#"{"choices":[{"delta":{"reasoning":null,"reasoning_content":"deep"}}]}"#,
        );
        assert_eq!(result.thinking_delta, "deep");
    }

    #[test]
    fn usage_chunk_with_empty_choices() {
        let result = parse_openai_sse_data(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#,
        );
        let usage = result.usage.unwrap();
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(30));
        assert_eq!(usage.total_tokens, Some(42));
        assert_eq!(result.content_delta, "");
    }

    #[test]
    fn null_usage_is_ignored() {
        let result = parse_openai_sse_data(r#"{"choices":[{"delta":{"content":"x"}}],"usage":null}"#);
        assert!(result.usage.is_none());
    }
}
