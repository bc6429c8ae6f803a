//! Change-log coordinates.
//!
//! A [`LogPosition`] identifies one point in the change log of one origin
//! (a source database instance). Positions are produced by the upstream
//! parser, carried inside every [`Event`](crate::event::Event), and
//! persisted as consumer cursors.
//!
//! ## Ordering
//!
//! Two positions of the same origin are ordered by `(journal_name, offset)`.
//! Positions of different origins have no common coordinate system, so the
//! comparison falls back to the logical timestamp.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of the origin that produced a change log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogIdentity {
    /// Address of the source database (`host:port`).
    pub source_address: String,
    /// Replica id the relay registered with when reading this log.
    pub slave_id: i64,
}

impl LogIdentity {
    /// Creates a new origin identity.
    #[must_use]
    pub fn new(source_address: impl Into<String>, slave_id: i64) -> Self {
        Self {
            source_address: source_address.into(),
            slave_id,
        }
    }
}

impl fmt::Display for LogIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_address, self.slave_id)
    }
}

/// Coordinate within a single origin's change log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryPosition {
    /// Log segment (binlog file) name, if known.
    pub journal_name: Option<String>,
    /// Offset within the segment, if known.
    pub offset: Option<u64>,
    /// Logical timestamp (milliseconds since epoch) of the entry.
    pub timestamp: i64,
    /// Whether consumption starting here includes this coordinate.
    pub included: bool,
}

impl EntryPosition {
    /// Creates an exact coordinate.
    #[must_use]
    pub fn new(journal_name: impl Into<String>, offset: u64, timestamp: i64) -> Self {
        Self {
            journal_name: Some(journal_name.into()),
            offset: Some(offset),
            timestamp,
            included: false,
        }
    }

    /// Creates a coordinate known only by its timestamp.
    #[must_use]
    pub fn from_timestamp(timestamp: i64) -> Self {
        Self {
            journal_name: None,
            offset: None,
            timestamp,
            included: false,
        }
    }

    /// Returns `true` if neither the segment name nor the offset is set.
    ///
    /// Such positions are matched purely by timestamp.
    #[must_use]
    pub fn is_timestamp_only(&self) -> bool {
        self.journal_name.as_deref().map_or(true, |name| name.trim().is_empty())
            && self.offset.is_none()
    }
}

/// A coordinate tagged with the identity of the origin it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Origin of the log.
    pub identity: LogIdentity,
    /// Coordinate within that log.
    pub position: EntryPosition,
}

impl LogPosition {
    /// Creates a position from its parts.
    #[must_use]
    pub fn new(identity: LogIdentity, position: EntryPosition) -> Self {
        Self { identity, position }
    }

    /// Returns `true` if reading from this position includes the entry at it.
    #[must_use]
    pub fn is_included(&self) -> bool {
        self.position.included
    }

    /// Returns a copy with the `included` flag replaced.
    #[must_use]
    pub fn with_included(mut self, included: bool) -> Self {
        self.position.included = included;
        self
    }

    /// Compares two positions.
    ///
    /// Same origin: by segment name, then offset. Different origins: by
    /// timestamp only.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        if self.identity == other.identity {
            self.position
                .journal_name
                .cmp(&other.position.journal_name)
                .then_with(|| self.position.offset.cmp(&other.position.offset))
        } else {
            self.position.timestamp.cmp(&other.position.timestamp)
        }
    }

    /// Returns the smaller of two positions; ties return `first`.
    #[must_use]
    pub fn min<'a>(first: &'a Self, second: &'a Self) -> &'a Self {
        if first.compare(second) == Ordering::Greater {
            second
        } else {
            first
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}({}){}",
            self.identity,
            self.position.journal_name.as_deref().unwrap_or("-"),
            self.position
                .offset
                .map_or_else(|| "-".to_string(), |o| o.to_string()),
            self.position.timestamp,
            if self.position.included { "+" } else { "" }
        )
    }
}

/// Bounds of one batch of events plus its safe resumption point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    /// Position of the first event in the batch.
    pub start: LogPosition,
    /// Position of the last event in the batch.
    pub end: LogPosition,
    /// Latest transaction or DDL boundary inside the batch, if any.
    pub ack: Option<LogPosition>,
}

impl PositionRange {
    /// Creates a range without an ack point.
    #[must_use]
    pub fn new(start: LogPosition, end: LogPosition) -> Self {
        Self {
            start,
            end,
            ack: None,
        }
    }
}

impl fmt::Display for PositionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}", self.start, self.end)?;
        match &self.ack {
            Some(ack) => write!(f, ", ack={ack}]"),
            None => write!(f, "]"),
        }
    }
}
