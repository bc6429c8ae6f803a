//! Per-client record of delivered, unacknowledged batches.
//!
//! Every batch handed to a client gets an id from one counter shared by all
//! clients of the ledger. The ledger keeps `batch_id → PositionRange` per
//! client, ordered by id, until the client acknowledges or rolls back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::client::ClientIdentity;
use crate::position::PositionRange;

/// In-memory batch ledger.
#[derive(Debug)]
pub struct BatchLedger {
    batches: Mutex<FxHashMap<ClientIdentity, BTreeMap<i64, PositionRange>>>,
    next_id: AtomicI64,
}

impl Default for BatchLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchLedger {
    /// Creates an empty ledger; the first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(FxHashMap::default()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Records `range` for `client` under a fresh id.
    pub fn add_batch(&self, client: &ClientIdentity, range: PositionRange) -> i64 {
        let mut batches = self.batches.lock();
        let batch_id = self.next_id.fetch_add(1, Ordering::AcqRel);
        batches
            .entry(client.clone())
            .or_default()
            .insert(batch_id, range);
        batch_id
    }


    /// Batch with the highest id.
    #[must_use]
    pub fn get_latest_batch(&self, client: &ClientIdentity) -> Option<PositionRange> {
        self.batches
            .lock()
            .get(client)
            .and_then(|ranges| ranges.last_key_value())
            .map(|(_, range)| range.clone())
    }

    /// Batch with the lowest id.
    #[must_use]
    pub fn get_first_batch(&self, client: &ClientIdentity) -> Option<PositionRange> {
        self.batches
            .lock()
            .get(client)
            .and_then(|ranges| ranges.first_key_value())
            .map(|(_, range)| range.clone())
    }

    /// Batch with the given id.
    #[must_use]
    pub fn get_batch(&self, client: &ClientIdentity, batch_id: i64) -> Option<PositionRange> {
        self.batches
            .lock()
            .get(client)
            .and_then(|ranges| ranges.get(&batch_id))
            .cloned()
    }

    /// Removes and returns a batch.
    ///
    /// Clients remove batches in id order; an out-of-order removal is
    /// logged but allowed.
    pub fn remove_batch(&self, client: &ClientIdentity, batch_id: i64) -> Option<PositionRange> {
        let mut batches = self.batches.lock();
        let ranges = batches.get_mut(client)?;
        if let Some((&oldest, _)) = ranges.first_key_value() {
            if oldest < batch_id {
                debug!(%client, batch_id, oldest, "removing batch while an older one is outstanding");
            }
        }
        ranges.remove(&batch_id)
    }

    /// Outstanding ids, ascending.
    #[must_use]
    pub fn list_batch_ids(&self, client: &ClientIdentity) -> Vec<i64> {
        self.batches
            .lock()
            .get(client)
            .map(|ranges| ranges.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Copy of every outstanding batch.
    #[must_use]
    pub fn list_all_batches(&self, client: &ClientIdentity) -> BTreeMap<i64, PositionRange> {
        self.batches
            .lock()
            .get(client)
            .cloned()
            .unwrap_or_default()
    }

    /// Forgets every outstanding batch of `client`.
    pub fn clear_all_batches(&self, client: &ClientIdentity) {
        if let Some(ranges) = self.batches.lock().get_mut(client) {
            ranges.clear();
        }
    }

    /// Drops all state of `client`.
    pub fn remove_client(&self, client: &ClientIdentity) {
        self.batches.lock().remove(client);
    }

    /// Forgets the batches of every client. Ids keep increasing.
    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}
