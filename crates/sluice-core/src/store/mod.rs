//! # Event Store
//!
//! Bounded, position-addressed buffering between the upstream parser
//! (producer) and the subscription protocol (consumer).
//!
//! ## Overview
//!
//! - [`EventStore`]: the producer/consumer contract
//! - [`RingBufferStore`]: fixed-capacity circular implementation
//! - [`StoreConfig`]: capacity, memory unit, batch mode and DDL isolation
//! - [`Events`]: one read result (events plus their [`PositionRange`])
//!
//! ## Sequences
//!
//! ```text
//!        ack_seq          get_seq                put_seq
//!           │                │                      │
//!   ────────▼────────────────▼──────────────────────▼─────────▶
//!   acked   │ delivered, not acked │  not yet delivered │ free
//! ```
//!
//! `ack_seq ≤ get_seq ≤ put_seq` always holds; all three start at `-1`.
//!
//! ## Wait disciplines
//!
//! Both the write and the read side come in three flavours:
//!
//! | write            | read             | behaviour                               |
//! |------------------|------------------|-----------------------------------------|
//! | `put`            | `get`            | wait until the condition holds          |
//! | `put_timeout`    | `get_timeout`    | wait until a deadline                   |
//! | `try_put`        | `try_get`        | never wait                              |

pub mod config;
pub mod error;
pub mod ring_buffer;

use std::time::Duration;

pub use config::{BatchMode, StoreConfig, StoreConfigBuilder};
pub use error::StoreError;
pub use ring_buffer::{RingBufferStore, StoreStats};

use crate::event::Event;
use crate::position::{LogPosition, PositionRange};

/// Result of a read: a contiguous run of events and the range they span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Events {
    events: Vec<Event>,
    range: Option<PositionRange>,
}

impl Events {
    /// An empty read result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a non-empty run of events with its computed range.
    #[must_use]
    pub(crate) fn new(events: Vec<Event>, range: PositionRange) -> Self {
        Self {
            events,
            range: Some(range),
        }
    }

    /// The events, in log order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Range spanned by the events; `None` iff the result is empty.
    #[must_use]
    pub fn range(&self) -> Option<&PositionRange> {
        self.range.as_ref()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if no event was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Splits into events and range.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Event>, Option<PositionRange>) {
        (self.events, self.range)
    }
}

/// Producer/consumer contract of an event store.
///
/// Every method is safe to call from any thread. Blocking methods return
/// [`StoreError::Interrupted`] when the store is interrupted or stopped while
/// they wait.
pub trait EventStore: Send + Sync {
    /// Allocates the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the configuration is unusable.
    fn start(&self) -> Result<(), StoreError>;

    /// Discards all buffered state and wakes blocked callers.
    fn stop(&self);

    /// Returns `true` between `start` and `stop`.
    fn is_started(&self) -> bool;

    /// Appends `events` atomically, waiting as long as needed for room.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`] or [`StoreError::Interrupted`].
    fn put(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Appends `events` atomically, waiting at most `timeout` for room.
    ///
    /// Returns `Ok(false)` on timeout; nothing is admitted in that case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`] or [`StoreError::Interrupted`].
    fn put_timeout(&self, events: &[Event], timeout: Duration) -> Result<bool, StoreError>;

    /// Appends `events` atomically if there is room right now.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`].
    fn try_put(&self, events: &[Event]) -> Result<bool, StoreError>;

    /// Reads forward from the read cursor, waiting until `batch_size` is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`] or [`StoreError::Interrupted`].
    fn get(&self, start: Option<&LogPosition>, batch_size: usize) -> Result<Events, StoreError>;

    /// Reads forward from the read cursor, waiting at most `timeout` for
    /// `batch_size`; returns whatever is available at the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`] or [`StoreError::Interrupted`].
    fn get_timeout(
        &self,
        start: Option<&LogPosition>,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Events, StoreError>;

    /// Reads whatever is available right now, up to `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`].
    fn try_get(&self, start: Option<&LogPosition>, batch_size: usize)
        -> Result<Events, StoreError>;

    /// Earliest position still readable, `None` if nothing was ever put.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`].
    fn first_position(&self) -> Result<Option<LogPosition>, StoreError>;

    /// Most recently put position, `None` if nothing was ever put.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`].
    fn latest_position(&self) -> Result<Option<LogPosition>, StoreError>;

    /// Acknowledges every delivered event up to and including `position`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AckPositionNotFound`] if no delivered,
    /// unacknowledged event matches `position`.
    fn ack(&self, position: &LogPosition) -> Result<(), StoreError>;

    /// Un-reads everything delivered but not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotStarted`].
    fn rollback(&self) -> Result<(), StoreError>;

    /// Drops all buffered events, resets the sequences and releases the
    /// buffer. Blocked callers are interrupted; [`EventStore::start`]
    /// allocates a fresh buffer.
    fn clean_all(&self);

    /// Appends a single event, waiting as long as needed.
    ///
    /// # Errors
    ///
    /// See [`EventStore::put`].
    fn put_one(&self, event: Event) -> Result<(), StoreError> {
        self.put(std::slice::from_ref(&event))
    }

    /// Appends a single event, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// See [`EventStore::put_timeout`].
    fn put_one_timeout(&self, event: Event, timeout: Duration) -> Result<bool, StoreError> {
        self.put_timeout(std::slice::from_ref(&event), timeout)
    }

    /// Appends a single event if there is room right now.
    ///
    /// # Errors
    ///
    /// See [`EventStore::try_put`].
    fn try_put_one(&self, event: Event) -> Result<bool, StoreError> {
        self.try_put(std::slice::from_ref(&event))
    }

    /// Scavenges everything up to `position`; same as [`EventStore::ack`].
    ///
    /// # Errors
    ///
    /// See [`EventStore::ack`].
    fn clean_until(&self, position: &LogPosition) -> Result<(), StoreError> {
        self.ack(position)
    }
}
