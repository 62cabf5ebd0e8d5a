use std::fmt::Display;

/// A specialized error type for buffer operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// A public operation was invoked before `start()` or after `stop()`.
    #[error("coalescing buffer is not started")]
    NotStarted,
    /// A record was offered that can never fit the batch region.
    #[error("record of {size} bytes exceeds the batch capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },
    /// Admission needed the backend's remaining space but no observer is attached.
    #[error("no write observer attached")]
    NoObserver,
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal error (lock poisoning, thread spawn/join failure, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BufferError {
    /// Create an invalid configuration error from a displayable value.
    pub fn invalid_config<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidConfig(msg.to_string())
    }

    /// Create an internal error from a displayable value.
    pub fn internal<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Internal(msg.to_string())
    }
}

/// A Result type alias for buffer operations.
pub type BufferResult<T> = Result<T, BufferError>;
