//! Batch handed to a client.

use sluice_core::Event;

/// Batch id of an empty message.
pub const EMPTY_BATCH_ID: i64 = -1;

/// One batch of events and the id to acknowledge it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Ledger id, or [`EMPTY_BATCH_ID`] when nothing was read.
    pub batch_id: i64,
    /// Events in log order.
    pub entries: Vec<Event>,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(batch_id: i64, entries: Vec<Event>) -> Self {
        Self { batch_id, entries }
    }

    /// Message carrying no events.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(EMPTY_BATCH_ID, Vec::new())
    }

    /// Returns `true` if nothing was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
