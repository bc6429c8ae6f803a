//! Change events carried through the relay.
//!
//! An [`Event`] is one decoded change-log entry: an opaque payload plus the
//! header fields the buffer needs for batching and resumption (position,
//! entry/event kind, serialized length).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::position::{EntryPosition, LogIdentity, LogPosition};

// ---------------------------------------------------------------------------
// EntryType / EventType
// ---------------------------------------------------------------------------

/// Structural role of an entry inside the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Start of a transaction.
    TransactionBegin,
    /// Row-level change or statement inside a transaction.
    RowData,
    /// End (commit) of a transaction.
    TransactionEnd,
    /// Liveness marker without data.
    Heartbeat,
}

/// Kind of change an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Row insert.
    Insert,
    /// Row update.
    Update,
    /// Row delete.
    Delete,
    /// `CREATE TABLE` / `CREATE VIEW` ...
    Create,
    /// `ALTER TABLE`.
    Alter,
    /// `DROP TABLE`.
    Erase,
    /// Any other statement.
    Query,
    /// `TRUNCATE TABLE`.
    Truncate,
    /// `RENAME TABLE`.
    Rename,
    /// `CREATE INDEX`.
    CreateIndex,
    /// `DROP INDEX`.
    DropIndex,
}

impl EventType {
    /// Returns `true` for schema-changing statements.
    #[inline]
    #[must_use]
    pub fn is_ddl(self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::Alter
                | Self::Erase
                | Self::Rename
                | Self::Truncate
                | Self::CreateIndex
                | Self::DropIndex
        )
    }
}

// ---------------------------------------------------------------------------
// EventHeader
// ---------------------------------------------------------------------------

/// Header fields shared by every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    /// Log segment the entry was read from.
    pub journal_name: String,
    /// Offset of the entry within its segment.
    pub offset: u64,
    /// Execution time on the source (milliseconds since epoch).
    pub execute_time: i64,
    /// Serialized size of the entry in bytes.
    pub event_length: u64,
    /// Kind of change.
    pub event_type: EventType,
    /// Schema the change applies to.
    pub schema_name: String,
    /// Table the change applies to.
    pub table_name: String,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A decoded change-log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    identity: LogIdentity,
    entry_type: EntryType,
    header: EventHeader,
    payload: Bytes,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(
        identity: LogIdentity,
        entry_type: EntryType,
        header: EventHeader,
        payload: Bytes,
    ) -> Self {
        Self {
            identity,
            entry_type,
            header,
            payload,
        }
    }

    /// Origin of the event.
    #[must_use]
    pub fn identity(&self) -> &LogIdentity {
        &self.identity
    }

    /// Structural role of the event.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Header fields.
    #[must_use]
    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    /// Opaque encoded entry.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Serialized size used for byte-budget accounting.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.header.event_length
    }

    /// Returns `true` if the event is a schema change.
    #[inline]
    #[must_use]
    pub fn is_ddl(&self) -> bool {
        self.header.event_type.is_ddl()
    }

    /// Returns `true` for transaction begin and end markers.
    #[inline]
    #[must_use]
    pub fn is_transaction_boundary(&self) -> bool {
        matches!(
            self.entry_type,
            EntryType::TransactionBegin | EntryType::TransactionEnd
        )
    }

    /// Returns `true` if resuming right after this event cannot split a
    /// transaction.
    #[inline]
    #[must_use]
    pub fn is_ack_point(&self) -> bool {
        self.is_transaction_boundary() || self.is_ddl()
    }

    /// Position of this event, not included.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        self.position_with(false)
    }

    /// Position of this event with the given `included` flag.
    #[must_use]
    pub fn position_with(&self, included: bool) -> LogPosition {
        LogPosition::new(
            self.identity.clone(),
            EntryPosition {
                journal_name: Some(self.header.journal_name.clone()),
                offset: Some(self.header.offset),
                timestamp: self.header.execute_time,
                included,
            },
        )
    }

    /// Returns `true` if `position` designates this event.
    ///
    /// The timestamp must always match. Unless the position only carries a
    /// timestamp, origin, segment name and offset must match too.
    #[must_use]
    pub fn matches(&self, position: &LogPosition) -> bool {
        let entry = &position.position;
        if entry.timestamp != self.header.execute_time {
            return false;
        }
        if entry.is_timestamp_only() {
            return true;
        }
        position.identity == self.identity
            && entry.journal_name.as_deref() == Some(self.header.journal_name.as_str())
            && entry.offset == Some(self.header.offset)
    }
}
