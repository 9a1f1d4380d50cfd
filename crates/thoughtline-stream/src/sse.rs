//! Server-Sent Events frame reader.
//!
//! Frames are blocks of `field: value` lines terminated by a blank line.
//! Reads from the network arrive at arbitrary boundaries, so the decoder
//! buffers until a full `\n\n`-delimited frame is available and carries any
//! partial UTF-8 sequence over to the next read.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StreamError;

/// One logical SSE frame that carried at least one `data:` line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseRecord {
    pub event: Option<String>,
    pub id: Option<String>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
}

impl SseRecord {
    /// True when the frame's `event` field equals `name`.
    pub fn is_event(&self, name: &str) -> bool {
        self.event.as_deref() == Some(name)
    }
}

/// What a record handler wants the reader to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// How `read_sse` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Upstream closed the body.
    Ended,
    /// The handler returned `Flow::Stop`.
    Stopped,
    /// The cancellation token fired.
    Cancelled,
}

/// Incremental byte → `SseRecord` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    utf8_carry: Vec<u8>,
    /// Previous read ended in `\r`; a leading `\n` on the next read belongs to it.
    pending_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every record completed by this read.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        let text = self.decode_utf8(chunk);
        self.push_str(&text)
    }

    /// Feed already-decoded text; returns every record completed by this read.
    pub fn push_str(&mut self, text: &str) -> Vec<SseRecord> {
        self.append_normalized(text);

        let mut records = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let segment: String = self.buffer.drain(..pos + 2).collect();
            if let Some(record) = parse_frame(&segment[..pos]) {
                records.push(record);
            }
        }
        records
    }

    /// Text received after the last complete frame.
    pub fn residue(&self) -> &str {
        &self.buffer
    }

    fn append_normalized(&mut self, text: &str) {
        let mut chars = text.chars().peekable();
        if self.pending_cr {
            self.pending_cr = false;
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
        }
        while let Some(c) = chars.next() {
            if c == '\r' {
                self.buffer.push('\n');
                match chars.peek() {
                    Some('\n') => {
                        chars.next();
                    }
                    Some(_) => {}
                    None => self.pending_cr = true,
                }
            } else {
                self.buffer.push(c);
            }
        }
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.utf8_carry.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.utf8_carry) {
                Ok(s) => {
                    out.push_str(s);
                    self.utf8_carry.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.utf8_carry[..valid]));
                    match e.error_len() {
                        // Invalid sequence in the middle: replace and keep going.
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.utf8_carry.drain(..valid + bad);
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            self.utf8_carry.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Parse one blank-line-delimited segment. Returns `None` for frames without
/// any `data:` line (comments, keep-alives, bare `event:` frames).
pub fn parse_frame(segment: &str) -> Option<SseRecord> {
    let mut event = None;
    let mut id = None;
    let mut data: Vec<&str> = Vec::new();

    for line in segment.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field.trim(), value.strip_prefix(' ').unwrap_or(value)),
            None => (line.trim(), ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            // Ids containing NUL are ignored, as browsers do.
            "id" if !value.contains('\0') => id = Some(value.to_string()),
            "data" => data.push(value),
            // retry and unknown fields
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseRecord {
        event,
        id,
        data: data.join("\n"),
    })
}

/// Drive an HTTP body through the decoder, handing each record to `on_record`
/// in arrival order.
///
/// Returns as soon as the handler asks to stop or `cancel` fires; the body is
/// dropped on return, which releases the underlying connection. A dangling
/// undelimited frame at end-of-stream is discarded.
pub async fn read_sse<S, E, F>(
    body: S,
    cancel: &CancellationToken,
    mut on_record: F,
) -> Result<ReadOutcome, StreamError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    F: FnMut(SseRecord) -> Flow,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ReadOutcome::Cancelled),
            next = body.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
            None => break,
        };

        for record in decoder.push_bytes(&chunk) {
            if on_record(record) == Flow::Stop {
                debug!("sse reader stopped by handler");
                return Ok(ReadOutcome::Stopped);
            }
        }
    }

    if !decoder.residue().is_empty() {
        debug!(len = decoder.residue().len(), "discarding undelimited sse tail");
    }
    Ok(ReadOutcome::Ended)
}
