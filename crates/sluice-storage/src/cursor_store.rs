//! Subscription and cursor persistence via the [`CursorStore`] trait.
//!
//! A cursor is the last transaction-safe position a client acknowledged.
//! After a restart, reading resumes right after it.

use sluice_core::{ClientIdentity, LogPosition};

use crate::error::CursorStoreError;

/// Trait for subscription/cursor persistence backends.
pub trait CursorStore: Send + Sync {
    /// Opens the backend and loads any persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError`] on I/O or deserialization failure.
    fn start(&self) -> Result<(), CursorStoreError>;

    /// Closes the backend. Persisted state survives.
    fn stop(&self);

    /// Returns `true` between `start` and `stop`.
    fn is_started(&self) -> bool;

    /// Records a subscription, replacing the filter of an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError`] if not started or on persistence failure.
    fn subscribe(&self, client: &ClientIdentity) -> Result<(), CursorStoreError>;

    /// Removes a subscription together with its cursor.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError`] if not started or on persistence failure.
    fn unsubscribe(&self, client: &ClientIdentity) -> Result<(), CursorStoreError>;

    /// Returns `true` if `client` is subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError::NotStarted`] if not started.
    fn has_subscribed(&self, client: &ClientIdentity) -> Result<bool, CursorStoreError>;

    /// Subscribers of `destination`, in subscription order.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError::NotStarted`] if not started.
    fn list_subscribers(&self, destination: &str)
        -> Result<Vec<ClientIdentity>, CursorStoreError>;

    /// Persisted cursor of `client`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError::NotStarted`] if not started.
    fn get_cursor(&self, client: &ClientIdentity) -> Result<Option<LogPosition>, CursorStoreError>;

    /// Replaces the cursor of `client`.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError`] if not started or on persistence failure.
    fn update_cursor(
        &self,
        client: &ClientIdentity,
        position: &LogPosition,
    ) -> Result<(), CursorStoreError>;
}
