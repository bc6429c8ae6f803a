//! # Sluice Core
//!
//! Buffering core of the `sluice` change-data-capture relay.
//!
//! This crate provides:
//! - **Event model**: change events, log positions and position ranges
//! - **Event store**: bounded ring buffer with put/get/ack sequences,
//!   back-pressure and transaction-aware acknowledgement points
//! - **Batch ledger**: per-client record of delivered, unacknowledged batches
//!
//! ## Design Principles
//!
//! 1. **At-least-once delivery** - nothing leaves the buffer until acknowledged
//! 2. **Bounded memory** - producers block when the buffer is full
//! 3. **Transaction-safe resumption** - cursors only land on boundaries
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice_core::store::{EventStore, RingBufferStore, StoreConfig};
//!
//! let store = RingBufferStore::new(StoreConfig::default());
//! store.start()?;
//! store.put(&events)?;
//! let batch = store.get(None, 100)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod event;
pub mod ledger;
pub mod position;
pub mod store;

// Re-export key types
pub use client::ClientIdentity;
pub use event::{EntryType, Event, EventHeader, EventType};
pub use ledger::BatchLedger;
pub use position::{EntryPosition, LogIdentity, LogPosition, PositionRange};
pub use store::{EventStore, Events, RingBufferStore, StoreConfig, StoreError};
