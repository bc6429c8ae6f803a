//! Server error types.
//!
//! - `ServerError`: protocol violations, lifecycle errors and wrapped
//!   store/cursor-store failures

use sluice_core::{ClientIdentity, PositionRange, StoreError};
use sluice_storage::CursorStoreError;
use thiserror::Error;

/// Errors returned by the embedded server and its instances.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server has not been started.
    #[error("server is not running")]
    NotRunning,

    /// The destination exists but is not started.
    #[error("destination '{0}' should be started first")]
    DestinationNotStarted(String),

    /// The client has to subscribe first.
    #[error("client {0} should subscribe first")]
    NotSubscribed(ClientIdentity),

    /// `get` refused because an earlier batch is still unacknowledged.
    #[error("client {client} already fetched {range} without ack")]
    UnackedBatch {
        /// The client.
        client: ClientIdentity,
        /// Range of the outstanding batch.
        range: PositionRange,
    },

    /// The batch id is not outstanding for this client.
    #[error("batch {batch_id} of client {client} does not exist")]
    UnknownBatch {
        /// The client.
        client: ClientIdentity,
        /// The requested batch id.
        batch_id: i64,
    },

    /// No instance can be created for the destination.
    #[error("unknown destination '{0}'")]
    UnknownDestination(String),

    /// Event store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Cursor store failure.
    #[error("cursor store error: {0}")]
    CursorStore(#[from] CursorStoreError),

    /// Upstream parser failure.
    #[error("parser error: {0}")]
    Parser(String),

    /// Invalid server configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
