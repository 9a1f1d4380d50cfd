use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The response body failed mid-read (connection reset, timeout, ...).
    #[error("stream transport error: {0}")]
    Transport(String),

    /// A configured reasoning tag is unusable.
    #[error("invalid reasoning tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },
}
