//! Cursor store error types.

/// Errors from cursor store operations.
#[derive(Debug, thiserror::Error)]
pub enum CursorStoreError {
    /// I/O error while persisting or loading metadata.
    #[error("cursor store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("cursor store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The store has not been started.
    #[error("cursor store is not started")]
    NotStarted,
}
