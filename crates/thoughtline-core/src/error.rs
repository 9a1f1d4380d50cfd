use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThoughtlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThoughtlineError {
    /// Short error code string for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ThoughtlineError::Config(_) => "CONFIG_ERROR",
            ThoughtlineError::Serialization(_) => "SERIALIZATION_ERROR",
            ThoughtlineError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ThoughtlineError>;
