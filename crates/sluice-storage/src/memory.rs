//! Volatile cursor store.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sluice_core::{ClientIdentity, LogPosition};

use crate::cursor_store::CursorStore;
use crate::error::CursorStoreError;
use crate::meta::MetaTable;

/// Cursor store that keeps everything in memory. State is lost on stop.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    table: Mutex<MetaTable>,
    started: AtomicBool,
}

impl MemoryCursorStore {
    /// Creates a stopped store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_started(&self) -> Result<(), CursorStoreError> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CursorStoreError::NotStarted)
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn start(&self) -> Result<(), CursorStoreError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
        self.table.lock().clear();
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn subscribe(&self, client: &ClientIdentity) -> Result<(), CursorStoreError> {
        self.ensure_started()?;
        self.table.lock().subscribe(client);
        Ok(())
    }

    fn unsubscribe(&self, client: &ClientIdentity) -> Result<(), CursorStoreError> {
        self.ensure_started()?;
        self.table.lock().unsubscribe(client);
        Ok(())
    }

    fn has_subscribed(&self, client: &ClientIdentity) -> Result<bool, CursorStoreError> {
        self.ensure_started()?;
        Ok(self.table.lock().has_subscribed(client))
    }

    fn list_subscribers(
        &self,
        destination: &str,
    ) -> Result<Vec<ClientIdentity>, CursorStoreError> {
        self.ensure_started()?;
        Ok(self.table.lock().list_subscribers(destination))
    }

    fn get_cursor(&self, client: &ClientIdentity) -> Result<Option<LogPosition>, CursorStoreError> {
        self.ensure_started()?;
        Ok(self.table.lock().cursor(client))
    }

    fn update_cursor(
        &self,
        client: &ClientIdentity,
        position: &LogPosition,
    ) -> Result<(), CursorStoreError> {
        self.ensure_started()?;
        self.table.lock().update_cursor(client, position);
        Ok(())
    }
}
