//! File-backed cursor store.
//!
//! ## Disk Layout
//!
//! ```text
//! {data_dir}/
//!   example/
//!     meta.json      # DestinationMeta as pretty-printed JSON
//!   orders/
//!     meta.json
//! ```
//!
//! Every change rewrites the destination's `meta.json` through a temporary
//! file and a rename, so readers never see a partial file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sluice_core::{ClientIdentity, LogPosition};
use tracing::{debug, info};

use crate::cursor_store::CursorStore;
use crate::error::CursorStoreError;
use crate::meta::{DestinationMeta, MetaTable};

const META_FILE: &str = "meta.json";

/// Fsync a file so its contents are durable.
fn sync_file(path: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::OpenOptions::new().write(true).open(path)?;
    f.sync_all()
}

/// Fsync a directory so a rename inside it is durable.
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(path: &Path) -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        let f = std::fs::File::open(path)?;
        f.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Cursor store persisting one JSON file per destination.
#[derive(Debug)]
pub struct FileCursorStore {
    data_dir: PathBuf,
    table: Mutex<MetaTable>,
    started: AtomicBool,
}

impl FileCursorStore {
    /// Creates a stopped store rooted at `data_dir`. The directory is
    /// created on start.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            table: Mutex::new(MetaTable::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn destination_dir(&self, destination: &str) -> PathBuf {
        self.data_dir.join(destination)
    }

    fn meta_path(&self, destination: &str) -> PathBuf {
        self.destination_dir(destination).join(META_FILE)
    }

    fn ensure_started(&self) -> Result<(), CursorStoreError> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CursorStoreError::NotStarted)
        }
    }

    /// Loads every `{data_dir}/*/meta.json`.
    fn load_all(&self) -> Result<Vec<DestinationMeta>, CursorStoreError> {
        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)?.filter_map(Result::ok) {
            let path = entry.path().join(META_FILE);
            if !path.is_file() {
                continue;
            }
            let json = std::fs::read_to_string(&path)?;
            let mut meta: DestinationMeta = serde_json::from_str(&json)?;
            if meta.destination.is_empty() {
                meta.destination = entry.file_name().to_string_lossy().into_owned();
            }
            loaded.push(meta);
        }
        Ok(loaded)
    }

    /// Writes the current state of `destination` atomically.
    fn persist(&self, table: &MetaTable, destination: &str) -> Result<(), CursorStoreError> {
        let meta = table
            .destination(destination)
            .cloned()
            .unwrap_or_else(|| DestinationMeta {
                destination: destination.to_string(),
                clients: Vec::new(),
            });

        let dir = self.destination_dir(destination);
        std::fs::create_dir_all(&dir)?;
        let path = self.meta_path(destination);
        let json = serde_json::to_string_pretty(&meta)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        sync_file(&tmp_path)?;
        std::fs::rename(&tmp_path, &path)?;
        sync_dir(&dir)?;
        debug!(destination, clients = meta.clients.len(), "cursor metadata written");
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn start(&self) -> Result<(), CursorStoreError> {
        std::fs::create_dir_all(&self.data_dir)?;
        let loaded = self.load_all()?;
        let mut table = self.table.lock();
        table.clear();
        for meta in loaded {
            info!(destination = %meta.destination, clients = meta.clients.len(), "loaded cursor metadata");
            table.insert(meta);
        }
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
        let mut table = self.table.lock();
        table.subscribe(client);
        self.persist(&table, &client.destination)
    }

    fn unsubscribe(&self, client: &ClientIdentity) -> Result<(), CursorStoreError> {
        self.ensure_started()?;
        let mut table = self.table.lock();
        if table.unsubscribe(client) {
            self.persist(&table, &client.destination)?;
        }
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
        let mut table = self.table.lock();
        table.update_cursor(client, position);
        self.persist(&table, &client.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{EntryPosition, LogIdentity};

    fn position(offset: u64) -> LogPosition {
        LogPosition::new(
            LogIdentity::new("db1:3306", 1),
            EntryPosition::new("mysql-bin.000001", offset, 1_700_000_000_000),
        )
    }

    #[test]
    fn test_requires_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path());
        assert!(matches!(
            store.get_cursor(&ClientIdentity::new("example", 1)),
            Err(CursorStoreError::NotStarted)
        ));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClientIdentity::new("example", 1001).with_filter("shop\\..*");

        let store = FileCursorStore::new(dir.path());
        store.start().unwrap();
        store.subscribe(&client).unwrap();
        store.update_cursor(&client, &position(4)).unwrap();
        store.stop();
        assert!(dir.path().join("example").join("meta.json").is_file());

        let reopened = FileCursorStore::new(dir.path());
        reopened.start().unwrap();
        assert!(reopened.has_subscribed(&client).unwrap());
        assert_eq!(reopened.get_cursor(&client).unwrap(), Some(position(4)));
        let subscribers = reopened.list_subscribers("example").unwrap();
        assert_eq!(subscribers[0].effective_filter(), Some("shop\\..*"));
    }

    #[test]
    fn test_unsubscribe_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClientIdentity::new("example", 1);

        let store = FileCursorStore::new(dir.path());
        store.start().unwrap();
        store.subscribe(&client).unwrap();
        store.unsubscribe(&client).unwrap();
        store.stop();

        let reopened = FileCursorStore::new(dir.path());
        reopened.start().unwrap();
        assert!(!reopened.has_subscribed(&client).unwrap());
    }

    #[test]
    fn test_destinations_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path());
        store.start().unwrap();
        store.subscribe(&ClientIdentity::new("a", 1)).unwrap();
        store.subscribe(&ClientIdentity::new("b", 1)).unwrap();

        assert!(dir.path().join("a").join("meta.json").is_file());
        assert!(dir.path().join("b").join("meta.json").is_file());
        assert_eq!(store.list_subscribers("a").unwrap().len(), 1);
        assert!(!dir.path().join("a").join("meta.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("broken")).unwrap();
        std::fs::write(dir.path().join("broken").join("meta.json"), "{not json").unwrap();

        let store = FileCursorStore::new(dir.path());
        assert!(matches!(store.start(), Err(CursorStoreError::Serde(_))));
        assert!(!store.is_started());
    }
}
