use thiserror::Error;

/// Top-level error type for wadispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A request was rejected before any transport interaction.
    #[error("validation error: {0}")]
    Validation(String),

    /// Credential blob is missing or malformed.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Error from the messaging transport (connect, send, teardown).
    #[error("transport error: {0}")]
    Transport(String),

    /// A (target, line) pair exhausted its attempts. Aborts the dispatch.
    #[error("delivery to {target} failed after {attempts} attempt(s): {reason}")]
    Delivery {
        target: String,
        line: String,
        attempts: u32,
        reason: String,
    },

    /// A dispatch is already running.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Session store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
