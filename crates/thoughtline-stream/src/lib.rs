//! Streaming response pipeline: SSE framing, provider delta decoding, and
//! inline reasoning-tag splitting.

pub mod anthropic;
pub mod decoder;
pub mod delta;
pub mod error;
pub mod openai;
pub mod splitter;
pub mod sse;
pub mod upstream;

pub use anthropic::{parse_anthropic_sse_data, AnthropicStreamContext};
pub use decoder::DeltaDecoder;
pub use delta::DeltaResult;
pub use error::StreamError;
pub use openai::parse_openai_sse_data;
pub use splitter::{SplitDelta, TagSet, ThoughtChainSplitter};
pub use sse::{read_sse, Flow, ReadOutcome, SseDecoder, SseRecord};
pub use upstream::UpstreamError;
