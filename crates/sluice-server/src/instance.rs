//! One relay instance per destination.
//!
//! An [`Instance`] owns the components serving one destination: the event
//! store, the batch ledger, the cursor store and the parser topology.
//!
//! Start order: cursor store → event store → parsers (then the filters of
//! known subscribers are pushed down). Stop order is the reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use sluice_core::{BatchLedger, ClientIdentity, EventStore, RingBufferStore, StoreConfig};
use sluice_storage::{CursorStore, MemoryCursorStore};
use tracing::{error, info, info_span};

use crate::error::ServerError;
use crate::parser::{IdleParser, ParserTopology};

/// Components serving one destination.
pub struct Instance {
    destination: String,
    store: Arc<dyn EventStore>,
    ledger: BatchLedger,
    cursor_store: Arc<dyn CursorStore>,
    parser: ParserTopology,
    /// Serializes get/ack/rollback of this destination.
    protocol: Mutex<()>,
    started: AtomicBool,
}

impl Instance {
    /// Assembles an instance from its components.
    #[must_use]
    pub fn new(
        destination: impl Into<String>,
        store: Arc<dyn EventStore>,
        cursor_store: Arc<dyn CursorStore>,
        parser: ParserTopology,
    ) -> Self {
        Self {
            destination: destination.into(),
            store,
            ledger: BatchLedger::new(),
            cursor_store,
            parser,
            protocol: Mutex::new(()),
            started: AtomicBool::new(false),
        }
    }

    /// Ring buffer store, volatile cursors and an idle parser.
    #[must_use]
    pub fn in_memory(destination: impl Into<String>, config: StoreConfig) -> Self {
        let destination = destination.into();
        let parser = ParserTopology::Single(Arc::new(IdleParser::new(destination.clone())));
        Self::new(
            destination,
            Arc::new(RingBufferStore::new(config)),
            Arc::new(MemoryCursorStore::new()),
            parser,
        )
    }

    /// Destination name.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Event store; parsers put into it.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Outstanding batches per client.
    #[must_use]
    pub fn ledger(&self) -> &BatchLedger {
        &self.ledger
    }

    /// Subscriptions and cursors.
    #[must_use]
    pub fn cursor_store(&self) -> &Arc<dyn CursorStore> {
        &self.cursor_store
    }

    /// Upstream parsers.
    #[must_use]
    pub fn parser(&self) -> &ParserTopology {
        &self.parser
    }

    /// Takes the per-destination protocol lock.
    pub(crate) fn lock_protocol(&self) -> MutexGuard<'_, ()> {
        self.protocol.lock()
    }

    /// Returns `true` once [`Instance::start`] succeeded.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Starts the components in dependency order.
    ///
    /// # Errors
    ///
    /// Returns the first component failure; every component is stopped
    /// again before returning it.
    pub fn start(&self) -> Result<(), ServerError> {
        let _span = info_span!("destination", name = %self.destination).entered();
        if let Err(e) = self.start_components() {
            error!(error = %e, "instance failed to start");
            // best effort; the start failure is the one reported
            let _ = self.stop_components();
            return Err(e);
        }
        self.started.store(true, Ordering::Release);
        info!("instance started");
        Ok(())
    }

    fn start_components(&self) -> Result<(), ServerError> {
        if !self.cursor_store.is_started() {
            self.cursor_store.start()?;
        }
        if !self.store.is_started() {
            self.store.start()?;
        }
        if !self.parser.is_started() {
            self.parser.start()?;
            for client in self.cursor_store.list_subscribers(&self.destination)? {
                self.subscribe_change(&client);
            }
        }
        Ok(())
    }

    /// Stops the components in reverse order and forgets every outstanding
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns a parser shutdown failure; the store and cursor store are
    /// stopped regardless.
    pub fn stop(&self) -> Result<(), ServerError> {
        let _span = info_span!("destination", name = %self.destination).entered();
        self.started.store(false, Ordering::Release);
        let result = self.stop_components();
        info!("instance stopped");
        result
    }

    fn stop_components(&self) -> Result<(), ServerError> {
        let parser_result = self.parser.stop();
        if let Err(e) = &parser_result {
            error!(error = %e, "parser did not stop cleanly");
        }
        self.store.stop();
        self.ledger.clear();
        self.cursor_store.stop();
        parser_result
    }

    /// Pushes the client's filter down to the parsers.
    pub fn subscribe_change(&self, client: &ClientIdentity) {
        if let Some(filter) = client.effective_filter() {
            info!(%client, filter, "subscribe filter change");
            self.parser.set_filter(filter);
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("destination", &self.destination)
            .field("started", &self.is_started())
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::EventParser;

    fn instance_with_parser() -> (Instance, Arc<IdleParser>) {
        let parser = Arc::new(IdleParser::new("example"));
        let instance = Instance::new(
            "example",
            Arc::new(RingBufferStore::new(StoreConfig::with_buffer_size(16))),
            Arc::new(MemoryCursorStore::new()),
            ParserTopology::Single(parser.clone()),
        );
        (instance, parser)
    }

    #[test]
    fn test_start_and_stop_order() {
        let (instance, parser) = instance_with_parser();
        instance.start().unwrap();
        assert!(instance.is_started());
        assert!(instance.cursor_store().is_started());
        assert!(instance.store().is_started());
        assert!(parser.is_started());

        instance.stop().unwrap();
        assert!(!instance.is_started());
        assert!(!instance.store().is_started());
        assert!(!instance.cursor_store().is_started());
        assert!(!parser.is_started());
    }

    #[test]
    fn test_start_rejects_bad_store_config() {
        let instance = Instance::in_memory("example", StoreConfig::with_buffer_size(10));
        assert!(matches!(instance.start(), Err(ServerError::Store(_))));
        assert!(!instance.is_started());
    }

    #[test]
    fn test_filters_reapplied_after_parser_start() {
        let (instance, parser) = instance_with_parser();
        instance.cursor_store().start().unwrap();
        instance
            .cursor_store()
            .subscribe(&ClientIdentity::new("example", 1).with_filter("shop\\.orders"))
            .unwrap();

        instance.start().unwrap();
        assert_eq!(parser.filter().as_deref(), Some("shop\\.orders"));
    }

    struct UnreachableParser;

    impl EventParser for UnreachableParser {
        fn start(&self) -> Result<(), ServerError> {
            Err(ServerError::Parser("source unreachable".to_string()))
        }

        fn stop(&self) -> Result<(), ServerError> {
            Ok(())
        }

        fn is_started(&self) -> bool {
            false
        }

        fn set_filter(&self, _filter: &str) {}
    }

    #[test]
    fn test_failed_start_stops_started_components() {
        let idle = Arc::new(IdleParser::new("idle"));
        let parsers: Vec<Arc<dyn EventParser>> = vec![idle.clone(), Arc::new(UnreachableParser)];
        let instance = Instance::new(
            "example",
            Arc::new(RingBufferStore::new(StoreConfig::with_buffer_size(16))),
            Arc::new(MemoryCursorStore::new()),
            ParserTopology::Group(parsers),
        );

        assert!(matches!(instance.start(), Err(ServerError::Parser(_))));
        assert!(!instance.is_started());
        assert!(!instance.cursor_store().is_started());
        assert!(!instance.store().is_started());
        assert!(!idle.is_started());
    }

    #[test]
    fn test_stop_forgets_outstanding_batches() {
        let (instance, _parser) = instance_with_parser();
        instance.start().unwrap();
        let client = ClientIdentity::new("example", 1);
        let position = sluice_core::LogPosition::new(
            sluice_core::LogIdentity::new("db1:3306", 1),
            sluice_core::EntryPosition::new("mysql-bin.000001", 4, 4),
        );
        instance
            .ledger()
            .add_batch(&client, sluice_core::PositionRange::new(position.clone(), position));

        instance.stop().unwrap();
        assert!(instance.ledger().list_batch_ids(&client).is_empty());
    }

    #[test]
    fn test_blank_filter_not_pushed() {
        let (instance, parser) = instance_with_parser();
        instance.start().unwrap();
        instance.subscribe_change(&ClientIdentity::new("example", 1).with_filter(" "));
        assert_eq!(parser.filter(), None);
    }
}
