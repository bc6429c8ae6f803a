//! Event store error types.

/// Errors raised by event store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store configuration is unusable. Fatal at start.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    /// The store has not been started, or has been stopped.
    #[error("event store is not started")]
    NotStarted,

    /// The position to acknowledge is not in the unacknowledged range.
    ///
    /// Client and server disagree about what was delivered.
    #[error("ack position not found: {0}")]
    AckPositionNotFound(String),

    /// A blocking wait was interrupted.
    #[error("blocking wait interrupted")]
    Interrupted,
}
