//! # Sluice Storage
//!
//! Subscription and cursor persistence for the `sluice` relay.
//!
//! - [`MemoryCursorStore`]: volatile, for tests and disposable deployments
//! - [`FileCursorStore`]: one JSON file per destination, atomic rewrites

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Cursor store trait
pub mod cursor_store;

/// Cursor store errors
pub mod error;

/// File-backed cursor store
pub mod file;

/// In-memory cursor store
pub mod memory;

/// Persisted metadata layout
pub mod meta;

// Re-export key types
pub use cursor_store::CursorStore;
pub use error::CursorStoreError;
pub use file::FileCursorStore;
pub use memory::MemoryCursorStore;
pub use meta::{ClientMeta, DestinationMeta};
