//! Error types shared across the connection and reconnection components.

/// A connection failure, classified by the collaborator that owns the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Transient failures such as timeouts or network resets.
    #[error("retryable connection error: {0}")]
    Retryable(String),
    /// Failures that another attempt cannot fix, such as bad credentials or
    /// invalid parameters.
    #[error("fatal connection error: {0}")]
    Fatal(String),
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::Retryable(_))
    }
}

/// Errors surfaced by the reconnection machinery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    #[error("maximum reconnection attempts reached ({max_attempts})")]
    Exhausted { max_attempts: u32 },
    #[error("reconnection attempt #{attempt} failed: {source}")]
    AttemptFailed {
        attempt: u32,
        #[source]
        source: ConnectionError,
    },
    #[error(transparent)]
    Fatal(ConnectionError),
}

impl ReconnectError {
    /// Whether the supervising caller must treat this as terminal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReconnectError::AttemptFailed { .. })
    }
}
