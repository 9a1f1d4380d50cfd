// Full byte stream → records → deltas → split text, as an exchange sees it.
// Each capture is fed at several chunk sizes; the output must not change.

use thoughtline_core::{ProviderKind, TokenUsage};
use thoughtline_stream::{DeltaDecoder, SseDecoder, ThoughtChainSplitter};

#[derive(Debug, Default, PartialEq)]
struct Collected {
    content: String,
    thinking: String,
    usage: TokenUsage,
    done: bool,
}

fn run(provider: ProviderKind, wire: &[u8], chunk_size: usize) -> Collected {
    let mut sse = SseDecoder::new();
    let mut decoder = DeltaDecoder::new(provider);
    let mut splitter = ThoughtChainSplitter::default();
    let mut out = Collected::default();

    'read: for chunk in wire.chunks(chunk_size) {
        for record in sse.push_bytes(chunk) {
            let delta = decoder.decode(&record);
            out.thinking.push_str(&delta.thinking_delta);
            let split = splitter.push(&delta.content_delta);
            out.content.push_str(&split.content);
            out.thinking.push_str(&split.thinking);
            if let Some(usage) = &delta.usage {
                out.usage.merge(usage);
            }
            if delta.done {
                out.done = true;
                break 'read;
            }
        }
    }
    let rest = splitter.flush();
    out.content.push_str(&rest.content);
    out.thinking.push_str(&rest.thinking);
    out
}

const OPENAI_WIRE: &str = "\
: OPENROUTER PROCESSING\n\n\
data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"<think>The user \"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"wants a greeting</th\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"ink>Hi → there\"}}]}\n\n\
data: {not json\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n\n\
data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":12,\"total_tokens\":21}}\n\n\
data: [DONE]\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"after done\"}}]}\n\n";

#[test]
fn openai_stream_with_inline_think_tags() {
    let expected = run(ProviderKind::OpenAi, OPENAI_WIRE.as_bytes(), OPENAI_WIRE.len());
    assert_eq!(expected.content, "Hi → there!");
    assert_eq!(expected.thinking, "The user wants a greeting");
    assert_eq!(expected.usage.total(), Some(21));
    assert!(expected.done);

    for size in [1, 2, 3, 7, 16, 64] {
        assert_eq!(
            run(ProviderKind::OpenAi, OPENAI_WIRE.as_bytes(), size),
            expected,
            "chunk size {size}"
        );
    }
}

#[test]
fn openai_reasoning_field_and_crlf() {
    let wire = "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"plan\"}}]}\r\n\r\n\
                data: {\"choices\":[{\"delta\":{\"content\":\"answer\"}}]}\r\n\r\n\
                data: [DONE]\r\n\r\n";
    for size in [1, 5, wire.len()] {
        let out = run(ProviderKind::OpenAi, wire.as_bytes(), size);
        assert_eq!(out.content, "answer");
        assert_eq!(out.thinking, "plan");
        assert!(out.done);
    }
}

const ANTHROPIC_WIRE: &str = "\
event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\",\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n\
event: ping\n\
data: {\"type\":\"ping\"}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Let me think\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Héllo\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\", world\"}}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":15}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

#[test]
fn anthropic_stream_routes_blocks() {
    let expected = run(ProviderKind::Anthropic, ANTHROPIC_WIRE.as_bytes(), ANTHROPIC_WIRE.len());
    assert_eq!(expected.content, "Héllo, world");
    assert_eq!(expected.thinking, "Let me think");
    assert_eq!(expected.usage.input_tokens, Some(25));
    assert_eq!(expected.usage.output_tokens, Some(15));
    assert_eq!(expected.usage.total(), Some(40));
    assert!(!expected.done);

    for size in [1, 4, 13, 100] {
        assert_eq!(
            run(ProviderKind::Anthropic, ANTHROPIC_WIRE.as_bytes(), size),
            expected,
            "chunk size {size}"
        );
    }
}
