//! End-to-end subscription protocol tests.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use sluice_core::{
    ClientIdentity, EntryType, Event, EventHeader, EventStore, EventType, LogIdentity,
    RingBufferStore, StoreConfig, StoreError,
};
use sluice_server::{
    EmbeddedServer, IdleParser, Instance, InstanceRegistry, ParserTopology, ServerError,
    EMPTY_BATCH_ID,
};
use sluice_storage::MemoryCursorStore;

const DEST: &str = "example";

struct Fixture {
    server: Arc<EmbeddedServer>,
    store: Arc<RingBufferStore>,
    parser: Arc<IdleParser>,
}

fn fixture(config: StoreConfig) -> Fixture {
    let store = Arc::new(RingBufferStore::new(config));
    let parser = Arc::new(IdleParser::new(DEST));

    let (shared_store, shared_parser) = (Arc::clone(&store), Arc::clone(&parser));
    let registry = InstanceRegistry::new(Arc::new(
        move |dest: &str| -> sluice_server::Result<Arc<Instance>> {
            Ok(Arc::new(Instance::new(
                dest,
                shared_store.clone(),
                Arc::new(MemoryCursorStore::new()),
                ParserTopology::Single(shared_parser.clone()),
            )))
        },
    ));

    let server = Arc::new(EmbeddedServer::new(registry));
    server.start();
    server.start_destination(DEST).unwrap();
    Fixture {
        server,
        store,
        parser,
    }
}

fn default_fixture() -> Fixture {
    fixture(StoreConfig::with_buffer_size(16))
}

fn event(entry_type: EntryType, event_type: EventType, offset: u64) -> Event {
    Event::new(
        LogIdentity::new("db1:3306", 1001),
        entry_type,
        EventHeader {
            journal_name: "mysql-bin.000001".to_string(),
            offset,
            execute_time: 1_700_000_000_000 + offset as i64,
            event_length: 128,
            event_type,
            schema_name: "shop".to_string(),
            table_name: "orders".to_string(),
        },
        Bytes::from_static(b"row-image"),
    )
}

fn row(offset: u64) -> Event {
    event(EntryType::RowData, EventType::Insert, offset)
}

fn rows(offsets: std::ops::Range<u64>) -> Vec<Event> {
    offsets.map(row).collect()
}

fn offsets(events: &[Event]) -> Vec<u64> {
    events.iter().map(|e| e.header().offset).collect()
}

fn client() -> ClientIdentity {
    ClientIdentity::new(DEST, 1001)
}

#[test]
fn test_transaction_batch_ack_moves_cursor() {
    let f = default_fixture();
    let events = vec![
        event(EntryType::TransactionBegin, EventType::Query, 0),
        row(1),
        row(2),
        row(3),
        event(EntryType::TransactionEnd, EventType::Query, 4),
    ];
    f.store.put(&events).unwrap();
    f.server.subscribe(&client()).unwrap();

    let message = f.server.get_without_ack(&client(), 5, None).unwrap();
    assert_eq!(message.batch_id, 1);
    assert_eq!(message.entries, events);

    let instance = f.server.instance(DEST).unwrap();
    let range = instance.ledger().get_batch(&client(), 1).unwrap();
    assert_eq!(range.ack, Some(events[4].position()));

    f.server.ack(&client(), message.batch_id).unwrap();
    assert_eq!(
        instance.cursor_store().get_cursor(&client()).unwrap(),
        Some(events[4].position())
    );
    assert_eq!(f.store.occupancy(), 0);
    assert!(f.server.list_batch_ids(&client()).unwrap().is_empty());
}

#[test]
fn test_subscribe_seeds_cursor_from_first_position() {
    let f = default_fixture();
    f.store.put(&rows(0..2)).unwrap();
    f.server.subscribe(&client()).unwrap();

    let instance = f.server.instance(DEST).unwrap();
    assert_eq!(
        instance.cursor_store().get_cursor(&client()).unwrap(),
        Some(row(0).position())
    );
    assert_eq!(f.server.list_all_subscribe(DEST).unwrap(), vec![client()]);
}

#[test]
fn test_subscribe_on_empty_store_leaves_cursor_unset() {
    let f = default_fixture();
    f.server.subscribe(&client()).unwrap();
    let instance = f.server.instance(DEST).unwrap();
    assert_eq!(instance.cursor_store().get_cursor(&client()).unwrap(), None);
}

#[test]
fn test_subscribe_pushes_filter_to_parser() {
    let f = default_fixture();
    f.server
        .subscribe(&client().with_filter("shop\\.orders"))
        .unwrap();
    assert_eq!(f.parser.filter().as_deref(), Some("shop\\.orders"));

    f.server.subscribe(&client().with_filter("shop\\..*")).unwrap();
    assert_eq!(f.parser.filter().as_deref(), Some("shop\\..*"));
    let subscribers = f.server.list_all_subscribe(DEST).unwrap();
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0].effective_filter(), Some("shop\\..*"));
}

#[test]
fn test_rollback_serves_same_events_again() {
    let f = default_fixture();
    f.store.put(&rows(0..3)).unwrap();
    f.server.subscribe(&client()).unwrap();

    let first = f.server.get_without_ack(&client(), 3, None).unwrap();
    assert_eq!(offsets(&first.entries), vec![0, 1, 2]);

    f.server.rollback(&client()).unwrap();
    assert!(f.server.list_batch_ids(&client()).unwrap().is_empty());

    let again = f.server.get_without_ack(&client(), 3, None).unwrap();
    assert_eq!(offsets(&again.entries), vec![0, 1, 2]);
    assert_ne!(again.batch_id, first.batch_id);
    assert_eq!(f.server.list_batch_ids(&client()).unwrap(), vec![again.batch_id]);
}

#[test]
fn test_consecutive_reads_continue_after_outstanding_batch() {
    let f = default_fixture();
    f.store.put(&rows(0..4)).unwrap();
    f.server.subscribe(&client()).unwrap();

    let first = f.server.get_without_ack(&client(), 2, None).unwrap();
    let second = f.server.get_without_ack(&client(), 2, None).unwrap();
    assert_eq!(offsets(&first.entries), vec![0, 1]);
    assert_eq!(offsets(&second.entries), vec![2, 3]);
    assert_eq!(
        f.server.list_batch_ids(&client()).unwrap(),
        vec![first.batch_id, second.batch_id]
    );

    f.server.ack(&client(), first.batch_id).unwrap();
    f.server.ack(&client(), second.batch_id).unwrap();
    assert_eq!(f.store.occupancy(), 0);
}

#[test]
fn test_duplicate_ack_rejected() {
    let f = default_fixture();
    f.store.put(&rows(0..2)).unwrap();
    f.server.subscribe(&client()).unwrap();

    let message = f.server.get_without_ack(&client(), 2, None).unwrap();
    f.server.ack(&client(), message.batch_id).unwrap();
    assert!(matches!(
        f.server.ack(&client(), message.batch_id),
        Err(ServerError::UnknownBatch { batch_id, .. }) if batch_id == message.batch_id
    ));
}

#[test]
fn test_empty_read_returns_sentinel_without_ledger_entry() {
    let f = default_fixture();
    f.server.subscribe(&client()).unwrap();

    let message = f.server.get_without_ack(&client(), 10, None).unwrap();
    assert_eq!(message.batch_id, EMPTY_BATCH_ID);
    assert!(message.is_empty());
    assert!(f.server.list_batch_ids(&client()).unwrap().is_empty());

    let timed = f
        .server
        .get_without_ack(&client(), 10, Some(Duration::from_millis(20)))
        .unwrap();
    assert_eq!(timed.batch_id, EMPTY_BATCH_ID);

    let instance = f.server.instance(DEST).unwrap();
    assert_eq!(instance.cursor_store().get_cursor(&client()).unwrap(), None);
}

#[test]
fn test_get_acks_immediately() {
    let f = default_fixture();
    f.store
        .put(&[
            event(EntryType::TransactionBegin, EventType::Query, 0),
            row(1),
            event(EntryType::TransactionEnd, EventType::Query, 2),
        ])
        .unwrap();
    f.server.subscribe(&client()).unwrap();

    let message = f.server.get(&client(), 10, None).unwrap();
    assert_eq!(message.entries.len(), 3);
    assert!(f.server.list_batch_ids(&client()).unwrap().is_empty());
    assert_eq!(f.store.occupancy(), 0);

    let instance = f.server.instance(DEST).unwrap();
    assert_eq!(
        instance.cursor_store().get_cursor(&client()).unwrap(),
        Some(message.entries[2].position())
    );
}

#[test]
fn test_get_refused_with_unacked_batch() {
    let f = default_fixture();
    f.store.put(&rows(0..4)).unwrap();
    f.server.subscribe(&client()).unwrap();

    f.server.get_without_ack(&client(), 2, None).unwrap();
    assert!(matches!(
        f.server.get(&client(), 2, None),
        Err(ServerError::UnackedBatch { .. })
    ));
}

#[test]
fn test_ddl_isolated_through_protocol() {
    let f = fixture(
        StoreConfig::builder()
            .buffer_size(16)
            .ddl_isolation(true)
            .build(),
    );
    f.store
        .put(&[
            row(0),
            row(1),
            event(EntryType::RowData, EventType::Alter, 2),
            row(3),
        ])
        .unwrap();
    f.server.subscribe(&client()).unwrap();

    let dml = f.server.get_without_ack(&client(), 10, None).unwrap();
    assert_eq!(offsets(&dml.entries), vec![0, 1]);
    let instance = f.server.instance(DEST).unwrap();
    assert_eq!(instance.ledger().get_batch(&client(), dml.batch_id).unwrap().ack, None);

    let ddl = f.server.get_without_ack(&client(), 10, None).unwrap();
    assert_eq!(offsets(&ddl.entries), vec![2]);
}

#[test]
fn test_rollback_batch_rolls_back_whole_store() {
    let f = default_fixture();
    f.store.put(&rows(0..4)).unwrap();
    f.server.subscribe(&client()).unwrap();

    let first = f.server.get_without_ack(&client(), 2, None).unwrap();
    let second = f.server.get_without_ack(&client(), 2, None).unwrap();

    assert!(matches!(
        f.server.rollback_batch(&client(), 99),
        Err(ServerError::UnknownBatch { .. })
    ));
    f.server.rollback_batch(&client(), second.batch_id).unwrap();
    assert_eq!(f.server.list_batch_ids(&client()).unwrap(), vec![first.batch_id]);

    // the store rewound to the last ack, so the first batch is served again
    let again = f.server.get_without_ack(&client(), 2, None).unwrap();
    assert_eq!(offsets(&again.entries), vec![0, 1]);
}

#[test]
fn test_preconditions() {
    let f = default_fixture();
    let stranger = ClientIdentity::new(DEST, 7);

    assert!(matches!(
        f.server.get_without_ack(&stranger, 1, None),
        Err(ServerError::NotSubscribed(_))
    ));
    assert!(matches!(
        f.server.ack(&stranger, 1),
        Err(ServerError::NotSubscribed(_))
    ));
    assert!(matches!(
        f.server.list_batch_ids(&stranger),
        Err(ServerError::NotSubscribed(_))
    ));
    f.server.rollback(&stranger).unwrap();
    f.server.rollback_batch(&stranger, 1).unwrap();

    let elsewhere = ClientIdentity::new("other", 1);
    assert!(matches!(
        f.server.subscribe(&elsewhere),
        Err(ServerError::DestinationNotStarted(_))
    ));
    assert!(matches!(
        f.server.rollback(&elsewhere),
        Err(ServerError::DestinationNotStarted(_))
    ));
}

#[test]
fn test_unsubscribe_forgets_batches() {
    let f = default_fixture();
    f.store.put(&rows(0..2)).unwrap();
    f.server.subscribe(&client()).unwrap();
    f.server.get_without_ack(&client(), 2, None).unwrap();

    f.server.unsubscribe(&client()).unwrap();
    assert!(matches!(
        f.server.list_batch_ids(&client()),
        Err(ServerError::NotSubscribed(_))
    ));
    f.server.subscribe(&client()).unwrap();
    assert!(f.server.list_batch_ids(&client()).unwrap().is_empty());
}

#[test]
fn test_restart_discards_outstanding_batches() {
    let f = default_fixture();
    f.store.put(&rows(0..3)).unwrap();
    f.server.subscribe(&client()).unwrap();
    let stale = f.server.get_without_ack(&client(), 3, None).unwrap();
    assert_eq!(stale.batch_id, 1);

    f.server.stop();
    f.server.start();
    f.server.start_destination(DEST).unwrap();
    f.server.subscribe(&client()).unwrap();
    assert!(f.server.list_batch_ids(&client()).unwrap().is_empty());

    f.store.put(&rows(10..12)).unwrap();
    let message = f.server.get(&client(), 2, None).unwrap();
    assert_eq!(offsets(&message.entries), vec![10, 11]);
    assert!(matches!(
        f.server.ack(&client(), stale.batch_id),
        Err(ServerError::UnknownBatch { .. })
    ));
}

#[test]
fn test_blocking_get_waits_for_producer() {
    let f = default_fixture();
    f.server.subscribe(&client()).unwrap();

    let consumer = {
        let server = Arc::clone(&f.server);
        thread::spawn(move || server.get_without_ack(&client(), 2, Some(Duration::ZERO)))
    };
    thread::sleep(Duration::from_millis(30));
    f.store.put(&rows(0..1)).unwrap();
    thread::sleep(Duration::from_millis(30));
    f.store.put(&rows(1..2)).unwrap();

    let message = consumer.join().unwrap().unwrap();
    assert_eq!(offsets(&message.entries), vec![0, 1]);
}

#[test]
fn test_stop_destination_interrupts_blocked_get() {
    let f = default_fixture();
    f.server.subscribe(&client()).unwrap();

    let consumer = {
        let server = Arc::clone(&f.server);
        thread::spawn(move || server.get_without_ack(&client(), 1, Some(Duration::ZERO)))
    };
    thread::sleep(Duration::from_millis(30));
    f.server.stop_destination(DEST).unwrap();

    assert!(matches!(
        consumer.join().unwrap(),
        Err(ServerError::Store(StoreError::Interrupted))
    ));
    assert!(!f.server.is_started(DEST));
}

#[test]
fn test_backpressure_end_to_end() {
    let f = fixture(StoreConfig::with_buffer_size(4));
    f.server.subscribe(&client()).unwrap();

    let producer = {
        let store = Arc::clone(&f.store);
        thread::spawn(move || {
            for offset in 0..20u64 {
                store.put_one(row(offset)).unwrap();
            }
        })
    };

    let mut received = Vec::new();
    while received.len() < 20 {
        let message = f
            .server
            .get_without_ack(&client(), 3, Some(Duration::from_millis(10)))
            .unwrap();
        if message.batch_id != EMPTY_BATCH_ID {
            received.extend(offsets(&message.entries));
            f.server.ack(&client(), message.batch_id).unwrap();
        }
        let stats = f.store.stats();
        assert!(stats.put_seq - stats.ack_seq <= 4);
    }
    producer.join().unwrap();
    assert_eq!(received, (0..20).collect::<Vec<_>>());
}
