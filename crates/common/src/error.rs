use thiserror::Error;

/// Top-level error type for taskgrid operations.
#[derive(Debug, Error)]
pub enum TaskGridError {
    // --- Transport errors (the other side may recover by retrying) ---
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    // --- Encoding errors (payload cannot be understood) ---
    #[error("codec error: {0}")]
    Codec(#[from] crate::codec::CodecError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Semantic errors ---
    #[error("wrong job id: expected {expected}, got {got}")]
    WrongJob { expected: i64, got: i64 },

    #[error("no job loaded")]
    NoJob,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    // --- Operational errors ---
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl TaskGridError {
    /// Whether a worker should retry the operation after a pause.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Result type alias for taskgrid operations.
pub type Result<T> = std::result::Result<T, TaskGridError>;
