//! Fixed-capacity circular event store.
//!
//! ## Design
//!
//! - Power-of-2 capacity with bitmask indexing (`seq & mask`)
//! - Three monotonically increasing sequences: put, get and ack
//! - One mutex guards the slots; two condition variables (`not_full`,
//!   `not_empty`) park blocked writers and readers
//! - Sequences and byte counters are atomics so [`RingBufferStore::stats`]
//!   never takes the lock
//!
//! Slots between `ack_seq` and `put_seq` are live. A put may reuse a slot
//! only once the event in it has been acknowledged.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::config::StoreConfig;
use super::error::StoreError;
use super::{EventStore, Events};
use crate::event::Event;
use crate::position::{LogPosition, PositionRange};

/// Initial value of every sequence.
const INIT_SEQUENCE: i64 = -1;

/// Mutex-protected part of the store.
struct Slots {
    /// Backing array; `None` while stopped.
    entries: Option<Box<[Option<Event>]>>,
    /// Bumped by every interrupt; blocked callers compare it on wake-up.
    epoch: u64,
}

impl Slots {
    fn entries(&self) -> Result<&[Option<Event>], StoreError> {
        self.entries.as_deref().ok_or(StoreError::NotStarted)
    }
}

/// Snapshot of the store sequences and byte counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of slots.
    pub capacity: usize,
    /// Sequence of the last event put.
    pub put_seq: i64,
    /// Sequence of the last event delivered.
    pub get_seq: i64,
    /// Sequence of the last event acknowledged.
    pub ack_seq: i64,
    /// Bytes put (byte-budget mode only).
    pub put_bytes: u64,
    /// Bytes delivered (byte-budget mode only).
    pub get_bytes: u64,
    /// Bytes acknowledged (byte-budget mode only).
    pub ack_bytes: u64,
}

impl StoreStats {
    /// Events held by the buffer (`put_seq - ack_seq`).
    #[must_use]
    pub fn occupancy(&self) -> i64 {
        self.put_seq - self.ack_seq
    }

    /// Events not yet delivered (`put_seq - get_seq`).
    #[must_use]
    pub fn backlog(&self) -> i64 {
        self.put_seq - self.get_seq
    }

    /// Events delivered but not acknowledged (`get_seq - ack_seq`).
    #[must_use]
    pub fn in_flight(&self) -> i64 {
        self.get_seq - self.ack_seq
    }
}

/// Bounded circular [`EventStore`].
///
/// Any number of producer and consumer threads may share one store; all
/// mutations happen under a single mutex.
///
/// # Example
///
/// ```rust,ignore
/// let store = RingBufferStore::new(StoreConfig::with_buffer_size(1024));
/// store.start()?;
/// store.put(&events)?;
/// let batch = store.get(None, 100)?;
/// if let Some(range) = batch.range() {
///     store.ack(&range.end)?;
/// }
/// ```
pub struct RingBufferStore {
    config: StoreConfig,
    /// Capacity mask for fast modulo (capacity - 1).
    mask: usize,

    slots: Mutex<Slots>,
    not_full: Condvar,
    not_empty: Condvar,
    started: AtomicBool,

    put_seq: AtomicI64,
    get_seq: AtomicI64,
    ack_seq: AtomicI64,

    put_bytes: AtomicU64,
    get_bytes: AtomicU64,
    ack_bytes: AtomicU64,
}

impl RingBufferStore {
    /// Creates a stopped store. The configuration is checked by
    /// [`EventStore::start`].
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            mask: config.buffer_size.wrapping_sub(1),
            config,
            slots: Mutex::new(Slots {
                entries: None,
                epoch: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            started: AtomicBool::new(false),
            put_seq: AtomicI64::new(INIT_SEQUENCE),
            get_seq: AtomicI64::new(INIT_SEQUENCE),
            ack_seq: AtomicI64::new(INIT_SEQUENCE),
            put_bytes: AtomicU64::new(0),
            get_bytes: AtomicU64::new(0),
            ack_bytes: AtomicU64::new(0),
        }
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.buffer_size
    }

    /// Wakes every blocked caller with [`StoreError::Interrupted`].
    pub fn interrupt(&self) {
        let mut guard = self.slots.lock();
        guard.epoch = guard.epoch.wrapping_add(1);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Lock-free snapshot of the sequences.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            capacity: self.config.buffer_size,
            put_seq: self.put_seq.load(Ordering::Acquire),
            get_seq: self.get_seq.load(Ordering::Acquire),
            ack_seq: self.ack_seq.load(Ordering::Acquire),
            put_bytes: self.put_bytes.load(Ordering::Acquire),
            get_bytes: self.get_bytes.load(Ordering::Acquire),
            ack_bytes: self.ack_bytes.load(Ordering::Acquire),
        }
    }

    /// Events held by the buffer.
    #[must_use]
    pub fn occupancy(&self) -> i64 {
        self.stats().occupancy()
    }

    /// Events not yet delivered.
    #[must_use]
    pub fn backlog(&self) -> i64 {
        self.stats().backlog()
    }

    #[inline]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn index(&self, seq: i64) -> usize {
        (seq as usize) & self.mask
    }

    #[allow(clippy::cast_possible_wrap)]
    fn capacity_i64(&self) -> i64 {
        self.config.buffer_size as i64
    }

    fn reset_sequences(&self) {
        self.put_seq.store(INIT_SEQUENCE, Ordering::Release);
        self.get_seq.store(INIT_SEQUENCE, Ordering::Release);
        self.ack_seq.store(INIT_SEQUENCE, Ordering::Release);
        self.put_bytes.store(0, Ordering::Release);
        self.get_bytes.store(0, Ordering::Release);
        self.ack_bytes.store(0, Ordering::Release);
    }

    /// Parks on `condvar` until `ready` holds.
    ///
    /// `deadline` of `None` waits forever; a deadline already in the past
    /// never waits. Returns `Ok(false)` when the deadline passes first.
    fn wait_until_ready(
        &self,
        guard: &mut MutexGuard<'_, Slots>,
        condvar: &Condvar,
        deadline: Option<Instant>,
        ready: impl Fn(&Self) -> bool,
    ) -> Result<bool, StoreError> {
        let epoch = guard.epoch;
        loop {
            guard.entries()?;
            if ready(self) {
                return Ok(true);
            }
            match deadline {
                None => condvar.wait(guard),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    condvar.wait_until(guard, deadline);
                }
            }
            if guard.epoch != epoch {
                // pass the wake-up on to a waiter that arrived after the interrupt
                condvar.notify_one();
                return Err(StoreError::Interrupted);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Write side
    // -----------------------------------------------------------------------

    /// Returns `true` if `count` more events fit.
    fn has_free_slots(&self, count: usize) -> bool {
        #[allow(clippy::cast_possible_wrap)]
        let wrap_point = self.put_seq.load(Ordering::Acquire) + count as i64 - self.capacity_i64();
        let min_point = self
            .get_seq
            .load(Ordering::Acquire)
            .min(self.ack_seq.load(Ordering::Acquire));
        if wrap_point > min_point {
            return false;
        }
        if self.config.batch_mode.is_mem_size() {
            // admission looks at what is held now, not at the incoming batch
            let held = self
                .put_bytes
                .load(Ordering::Acquire)
                .saturating_sub(self.ack_bytes.load(Ordering::Acquire));
            return held < self.config.mem_capacity();
        }
        true
    }

    fn put_with(&self, events: &[Event], deadline: Option<Instant>) -> Result<bool, StoreError> {
        let mut guard = self.slots.lock();
        if events.is_empty() {
            guard.entries()?;
            return Ok(true);
        }
        let count = events.len();
        if !self.wait_until_ready(&mut guard, &self.not_full, deadline, |s| {
            s.has_free_slots(count)
        })? {
            return Ok(false);
        }
        self.do_put(&mut guard, events);
        Ok(true)
    }

    fn do_put(&self, guard: &mut MutexGuard<'_, Slots>, events: &[Event]) {
        let Some(entries) = guard.entries.as_deref_mut() else {
            return;
        };
        let current = self.put_seq.load(Ordering::Acquire);
        let mut bytes = 0;
        let mut seq = current;
        for event in events {
            seq += 1;
            entries[self.index(seq)] = Some(event.clone());
            bytes += event.size();
        }
        self.put_seq.store(seq, Ordering::Release);
        if self.config.batch_mode.is_mem_size() {
            self.put_bytes.fetch_add(bytes, Ordering::AcqRel);
        }
        self.not_empty.notify_all();
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// First sequence a read starting at `start` returns.
    ///
    /// An included start re-reads the slot at `get_seq`; the result never
    /// reaches back into acknowledged slots.
    fn read_start(&self, start: Option<&LogPosition>) -> i64 {
        let current = self.get_seq.load(Ordering::Acquire);
        let next = match start {
            Some(position) if position.is_included() => current,
            _ => current + 1,
        };
        next.max(self.ack_seq.load(Ordering::Acquire) + 1)
    }

    /// Returns `true` if a full batch is available.
    fn has_unget_slots(&self, start: Option<&LogPosition>, batch_size: usize) -> bool {
        if self.config.batch_mode.is_item_size() {
            let current = self.get_seq.load(Ordering::Acquire);
            let max = self.put_seq.load(Ordering::Acquire);
            let next = self.read_start(start);
            let batch = i64::try_from(batch_size).unwrap_or(i64::MAX);
            current < max && next.saturating_add(batch) - 1 <= max
        } else {
            let available = self
                .put_bytes
                .load(Ordering::Acquire)
                .saturating_sub(self.get_bytes.load(Ordering::Acquire));
            available >= (batch_size as u64).saturating_mul(self.config.buffer_mem_unit)
        }
    }

    fn get_with(
        &self,
        start: Option<&LogPosition>,
        batch_size: usize,
        deadline: Option<Instant>,
    ) -> Result<Events, StoreError> {
        let mut guard = self.slots.lock();
        // on timeout the read returns whatever is there
        self.wait_until_ready(&mut guard, &self.not_empty, deadline, |s| {
            s.has_unget_slots(start, batch_size)
        })?;
        self.do_get(&guard, start, batch_size)
    }

    fn do_get(
        &self,
        slots: &Slots,
        start: Option<&LogPosition>,
        batch_size: usize,
    ) -> Result<Events, StoreError> {
        let entries = slots.entries()?;
        let current = self.get_seq.load(Ordering::Acquire);
        let max = self.put_seq.load(Ordering::Acquire);
        if current >= max || batch_size == 0 {
            return Ok(Events::empty());
        }

        let mut seq = self.read_start(start);
        let mut end = current;
        let mut bytes = 0u64;
        // bytes of slots past the old read cursor; a re-read slot is not counted twice
        let mut fresh = 0u64;
        let mut events = Vec::new();

        if self.config.batch_mode.is_item_size() {
            let batch = i64::try_from(batch_size).unwrap_or(i64::MAX);
            let limit = seq.saturating_add(batch - 1).min(max);
            while seq <= limit {
                let Some(event) = &entries[self.index(seq)] else {
                    break;
                };
                if self.config.ddl_isolation && event.is_ddl() {
                    if events.is_empty() {
                        events.push(event.clone());
                        end = seq;
                    }
                    break;
                }
                events.push(event.clone());
                end = seq;
                seq += 1;
            }
        } else {
            let max_bytes = (batch_size as u64).saturating_mul(self.config.buffer_mem_unit);
            while bytes <= max_bytes && seq <= max {
                let Some(event) = &entries[self.index(seq)] else {
                    break;
                };
                if self.config.ddl_isolation && event.is_ddl() {
                    if events.is_empty() {
                        events.push(event.clone());
                        bytes += event.size();
                        if seq > current {
                            fresh += event.size();
                        }
                        end = seq;
                    }
                    break;
                }
                events.push(event.clone());
                bytes += event.size();
                if seq > current {
                    fresh += event.size();
                }
                end = seq;
                seq += 1;
            }
        }

        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(Events::empty());
        };
        let mut range = PositionRange::new(first.position(), last.position());
        range.ack = events
            .iter()
            .rev()
            .find(|event| event.is_ack_point())
            .map(Event::position);

        if self
            .get_seq
            .compare_exchange(current, end, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(current, end, "read cursor moved concurrently, returning empty batch");
            return Ok(Events::empty());
        }
        if self.config.batch_mode.is_mem_size() {
            self.get_bytes.fetch_add(fresh, Ordering::AcqRel);
        }
        self.not_full.notify_all();
        Ok(Events::new(events, range))
    }
}

impl EventStore for RingBufferStore {
    fn start(&self) -> Result<(), StoreError> {
        self.config.validate()?;
        let mut guard = self.slots.lock();
        if guard.entries.is_some() {
            return Ok(());
        }
        guard.entries = Some((0..self.config.buffer_size).map(|_| None).collect());
        self.reset_sequences();
        self.started.store(true, Ordering::Release);
        info!(
            buffer_size = self.config.buffer_size,
            batch_mode = ?self.config.batch_mode,
            ddl_isolation = self.config.ddl_isolation,
            "event store started"
        );
        Ok(())
    }

    fn stop(&self) {
        self.clean_all();
        info!("event store stopped");
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn put(&self, events: &[Event]) -> Result<(), StoreError> {
        self.put_with(events, None).map(|_| ())
    }

    fn put_timeout(&self, events: &[Event], timeout: Duration) -> Result<bool, StoreError> {
        self.put_with(events, Some(Instant::now() + timeout))
    }

    fn try_put(&self, events: &[Event]) -> Result<bool, StoreError> {
        self.put_with(events, Some(Instant::now()))
    }

    fn get(&self, start: Option<&LogPosition>, batch_size: usize) -> Result<Events, StoreError> {
        self.get_with(start, batch_size, None)
    }

    fn get_timeout(
        &self,
        start: Option<&LogPosition>,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Events, StoreError> {
        self.get_with(start, batch_size, Some(Instant::now() + timeout))
    }

    fn try_get(
        &self,
        start: Option<&LogPosition>,
        batch_size: usize,
    ) -> Result<Events, StoreError> {
        let guard = self.slots.lock();
        self.do_get(&guard, start, batch_size)
    }

    fn first_position(&self) -> Result<Option<LogPosition>, StoreError> {
        let guard = self.slots.lock();
        let entries = guard.entries()?;
        let ack = self.ack_seq.load(Ordering::Acquire);
        let put = self.put_seq.load(Ordering::Acquire);

        let position = if ack == INIT_SEQUENCE && ack < put {
            entries[self.index(ack + 1)]
                .as_ref()
                .map(|event| event.position_with(false))
        } else if ack > INIT_SEQUENCE && ack < put {
            entries[self.index(ack + 1)]
                .as_ref()
                .map(|event| event.position_with(true))
        } else if ack > INIT_SEQUENCE && ack == put {
            entries[self.index(ack)]
                .as_ref()
                .map(|event| event.position_with(false))
        } else {
            None
        };
        Ok(position)
    }

    fn latest_position(&self) -> Result<Option<LogPosition>, StoreError> {
        let guard = self.slots.lock();
        let entries = guard.entries()?;
        let put = self.put_seq.load(Ordering::Acquire);
        if put == INIT_SEQUENCE {
            return Ok(None);
        }
        // a drained store resumes after its last event
        let included = put != self.ack_seq.load(Ordering::Acquire);
        Ok(entries[self.index(put)]
            .as_ref()
            .map(|event| event.position_with(included)))
    }

    fn ack(&self, position: &LogPosition) -> Result<(), StoreError> {
        let mut guard = self.slots.lock();
        let Some(entries) = guard.entries.as_deref_mut() else {
            return Err(StoreError::NotStarted);
        };
        let seq = self.ack_seq.load(Ordering::Acquire);
        let max = self.get_seq.load(Ordering::Acquire);
        let mut bytes = 0u64;

        for next in (seq + 1)..=max {
            let matched = match &entries[self.index(next)] {
                Some(event) => {
                    bytes += event.size();
                    event.matches(position)
                }
                None => break,
            };
            if !matched {
                continue;
            }

            if self.config.batch_mode.is_mem_size() {
                self.ack_bytes.fetch_add(bytes, Ordering::AcqRel);
                for released in (seq + 1)..next {
                    entries[self.index(released)] = None;
                }
            }
            if self
                .ack_seq
                .compare_exchange(seq, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.not_full.notify_all();
            }
            return Ok(());
        }

        warn!(%position, ack_seq = seq, get_seq = max, "ack position not found");
        Err(StoreError::AckPositionNotFound(position.to_string()))
    }

    fn rollback(&self) -> Result<(), StoreError> {
        let guard = self.slots.lock();
        guard.entries()?;
        self.get_seq
            .store(self.ack_seq.load(Ordering::Acquire), Ordering::Release);
        self.get_bytes
            .store(self.ack_bytes.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }

    fn clean_all(&self) {
        let mut guard = self.slots.lock();
        self.started.store(false, Ordering::Release);
        guard.entries = None;
        guard.epoch = guard.epoch.wrapping_add(1);
        self.reset_sequences();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

impl fmt::Debug for RingBufferStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("RingBufferStore")
            .field("capacity", &stats.capacity)
            .field("batch_mode", &self.config.batch_mode)
            .field("put_seq", &stats.put_seq)
            .field("get_seq", &stats.get_seq)
            .field("ack_seq", &stats.ack_seq)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
