//! Embedded subscription server.
//!
//! [`EmbeddedServer`] is the consumer-facing protocol: clients subscribe to
//! a destination, pull batches, and acknowledge or roll them back.
//!
//! ## Delivery
//!
//! Every batch handed out is recorded in the instance's
//! [`BatchLedger`](sluice_core::BatchLedger) until acknowledged. Acking
//! advances the persisted cursor to the batch's last transaction boundary
//! and releases the events from the store. Rolling back makes the store
//! serve everything unacknowledged again (at-least-once).
//!
//! ## Timeouts
//!
//! | `timeout`          | store call      |
//! |--------------------|-----------------|
//! | `None`             | `try_get`       |
//! | `Some(ZERO)`       | `get` (blocks)  |
//! | `Some(d)`          | `get_timeout`   |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sluice_core::{ClientIdentity, Event, EventStore, Events, LogPosition, StoreError};
use tracing::{debug, error, info, info_span};

use crate::error::ServerError;
use crate::instance::Instance;
use crate::message::Message;
use crate::registry::InstanceRegistry;

/// In-process subscription server over a set of destinations.
#[derive(Debug)]
pub struct EmbeddedServer {
    registry: InstanceRegistry,
    running: AtomicBool,
}

impl EmbeddedServer {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(registry: InstanceRegistry) -> Self {
        Self {
            registry,
            running: AtomicBool::new(false),
        }
    }

    /// Instance registry.
    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Cached instance of `destination`, started or not.
    #[must_use]
    pub fn instance(&self, destination: &str) -> Option<Arc<Instance>> {
        self.registry.get(destination)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts accepting requests.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("embedded server started");
        }
    }

    /// Stops every started instance, logging failures and continuing.
    pub fn stop(&self) {
        for instance in self.registry.instances() {
            if !instance.is_started() {
                continue;
            }
            match instance.stop() {
                Ok(()) => info!(destination = instance.destination(), "destination stopped"),
                Err(e) => error!(
                    destination = instance.destination(),
                    error = %e,
                    "failed to stop destination"
                ),
            }
        }
        self.running.store(false, Ordering::Release);
        info!("embedded server stopped");
    }

    /// Returns `true` between [`EmbeddedServer::start`] and
    /// [`EmbeddedServer::stop`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Creates the destination's instance on first use and starts it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`], the registry factory's error, or
    /// the instance start failure.
    pub fn start_destination(&self, destination: &str) -> Result<(), ServerError> {
        self.ensure_running()?;
        let instance = self.registry.get_or_create(destination)?;
        if !instance.is_started() {
            instance.start()?;
        }
        Ok(())
    }

    /// Removes the destination's instance and stops it.
    ///
    /// # Errors
    ///
    /// Returns the instance stop failure; the instance is removed regardless.
    pub fn stop_destination(&self, destination: &str) -> Result<(), ServerError> {
        match self.registry.remove(destination) {
            Some(instance) if instance.is_started() => instance.stop(),
            _ => Ok(()),
        }
    }

    /// Returns `true` if the destination's instance is running.
    #[must_use]
    pub fn is_started(&self, destination: &str) -> bool {
        self.registry
            .get(destination)
            .is_some_and(|instance| instance.is_started())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Subscribes `client`; subscribing again updates its filter.
    ///
    /// A first-time subscriber's cursor is seeded with the earliest position
    /// still held by the store.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error or a store/cursor-store failure.
    pub fn subscribe(&self, client: &ClientIdentity) -> Result<(), ServerError> {
        let instance = self.started_instance(&client.destination)?;
        let _span = info_span!("destination", name = %client.destination).entered();
        let cursors = instance.cursor_store();
        cursors.subscribe(client)?;

        if let Some(position) = cursors.get_cursor(client)? {
            info!(%client, %position, "subscribed, resuming from last cursor");
        } else {
            let first = instance.store().first_position()?;
            if let Some(position) = &first {
                cursors.update_cursor(client, position)?;
            }
            info!(%client, position = ?first, "subscribed from first position");
        }

        instance.subscribe_change(client);
        Ok(())
    }

    /// Removes the subscription and forgets the client's outstanding batches.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error or a cursor-store failure.
    pub fn unsubscribe(&self, client: &ClientIdentity) -> Result<(), ServerError> {
        let instance = self.started_instance(&client.destination)?;
        instance.cursor_store().unsubscribe(client)?;
        instance.ledger().remove_client(client);
        info!(%client, "unsubscribed");
        Ok(())
    }

    /// Subscribers of `destination`.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error or a cursor-store failure.
    pub fn list_all_subscribe(&self, destination: &str) -> Result<Vec<ClientIdentity>, ServerError> {
        let instance = self.started_instance(destination)?;
        Ok(instance.cursor_store().list_subscribers(destination)?)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Reads a batch and acknowledges it immediately.
    ///
    /// Refused while the client has an unacknowledged batch.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnackedBatch`], a lifecycle error, or a
    /// store/cursor-store failure.
    pub fn get(
        &self,
        client: &ClientIdentity,
        batch_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Message, ServerError> {
        let instance = self.subscribed_instance(client)?;
        let _span = info_span!("destination", name = %client.destination).entered();
        let _guard = instance.lock_protocol();

        if let Some(range) = instance.ledger().get_latest_batch(client) {
            return Err(ServerError::UnackedBatch {
                client: client.clone(),
                range,
            });
        }

        let start = instance.cursor_store().get_cursor(client)?;
        let events = read(&**instance.store(), start.as_ref(), batch_size, timeout)?;
        let Some((batch_id, entries)) = Self::register(&instance, client, events) else {
            return Ok(Message::empty());
        };
        Self::ack_locked(&instance, client, batch_id)?;
        Ok(Message::new(batch_id, entries))
    }

    /// Reads a batch and leaves it outstanding until [`EmbeddedServer::ack`]
    /// or a rollback.
    ///
    /// Reading resumes after the latest outstanding batch, else after the
    /// persisted cursor, else from the store's first position.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error or a store/cursor-store failure.
    pub fn get_without_ack(
        &self,
        client: &ClientIdentity,
        batch_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Message, ServerError> {
        let instance = self.subscribed_instance(client)?;
        let _span = info_span!("destination", name = %client.destination).entered();
        let _guard = instance.lock_protocol();

        let start: Option<LogPosition> = match instance.ledger().get_latest_batch(client) {
            Some(range) => Some(range.start),
            None => match instance.cursor_store().get_cursor(client)? {
                Some(cursor) => Some(cursor),
                None => instance.store().first_position()?,
            },
        };
        let events = read(&**instance.store(), start.as_ref(), batch_size, timeout)?;
        Ok(Self::register(&instance, client, events)
            .map_or_else(Message::empty, |(batch_id, entries)| {
                Message::new(batch_id, entries)
            }))
    }

    /// Records a non-empty read in the ledger.
    fn register(
        instance: &Instance,
        client: &ClientIdentity,
        events: Events,
    ) -> Option<(i64, Vec<Event>)> {
        let (entries, range) = events.into_parts();
        let Some(range) = range else {
            debug!(%client, "no events available");
            return None;
        };
        let first = range.start.clone();
        let last = range.end.clone();
        let batch_id = instance.ledger().add_batch(client, range);
        info!(
            %client,
            batch_id,
            size = entries.len(),
            start = %first,
            end = %last,
            "batch delivered"
        );
        Some((batch_id, entries))
    }

    // -----------------------------------------------------------------------
    // Acknowledgement
    // -----------------------------------------------------------------------

    /// Acknowledges a batch: persists its ack point as the client's cursor
    /// and releases its events from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownBatch`] for an id that is not
    /// outstanding (including a duplicate ack), a lifecycle error, or a
    /// store/cursor-store failure.
    pub fn ack(&self, client: &ClientIdentity, batch_id: i64) -> Result<(), ServerError> {
        let instance = self.subscribed_instance(client)?;
        let _span = info_span!("destination", name = %client.destination).entered();
        let _guard = instance.lock_protocol();
        Self::ack_locked(&instance, client, batch_id)
    }

    fn ack_locked(
        instance: &Instance,
        client: &ClientIdentity,
        batch_id: i64,
    ) -> Result<(), ServerError> {
        let range = instance
            .ledger()
            .remove_batch(client, batch_id)
            .ok_or_else(|| ServerError::UnknownBatch {
                client: client.clone(),
                batch_id,
            })?;
        if let Some(ack) = &range.ack {
            instance.cursor_store().update_cursor(client, ack)?;
        }
        instance.store().ack(&range.end)?;
        info!(%client, batch_id, "batch acknowledged");
        Ok(())
    }

    /// Discards every outstanding batch of `client`; the store serves the
    /// unacknowledged events again. No-op for an unknown client.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error or a store/cursor-store failure.
    pub fn rollback(&self, client: &ClientIdentity) -> Result<(), ServerError> {
        let instance = self.started_instance(&client.destination)?;
        if !instance.cursor_store().has_subscribed(client)? {
            return Ok(());
        }
        let _span = info_span!("destination", name = %client.destination).entered();
        let _guard = instance.lock_protocol();
        instance.ledger().clear_all_batches(client);
        instance.store().rollback()?;
        info!(%client, "rolled back all batches");
        Ok(())
    }

    /// Discards one outstanding batch. The store still rolls back to the
    /// last acknowledged event, so later outstanding batches are served
    /// again too. No-op for an unknown client.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownBatch`], a lifecycle error, or a
    /// store/cursor-store failure.
    pub fn rollback_batch(&self, client: &ClientIdentity, batch_id: i64) -> Result<(), ServerError> {
        let instance = self.started_instance(&client.destination)?;
        if !instance.cursor_store().has_subscribed(client)? {
            return Ok(());
        }
        let _span = info_span!("destination", name = %client.destination).entered();
        let _guard = instance.lock_protocol();
        if instance.ledger().remove_batch(client, batch_id).is_none() {
            return Err(ServerError::UnknownBatch {
                client: client.clone(),
                batch_id,
            });
        }
        instance.store().rollback()?;
        info!(%client, batch_id, "rolled back batch");
        Ok(())
    }

    /// Outstanding batch ids of `client`, ascending.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error or a cursor-store failure.
    pub fn list_batch_ids(&self, client: &ClientIdentity) -> Result<Vec<i64>, ServerError> {
        let instance = self.subscribed_instance(client)?;
        let _guard = instance.lock_protocol();
        Ok(instance.ledger().list_batch_ids(client))
    }

    // -----------------------------------------------------------------------
    // Preconditions
    // -----------------------------------------------------------------------

    fn ensure_running(&self) -> Result<(), ServerError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ServerError::NotRunning)
        }
    }

    fn started_instance(&self, destination: &str) -> Result<Arc<Instance>, ServerError> {
        self.ensure_running()?;
        match self.registry.get(destination) {
            Some(instance) if instance.is_started() => Ok(instance),
            _ => Err(ServerError::DestinationNotStarted(destination.to_string())),
        }
    }

    fn subscribed_instance(&self, client: &ClientIdentity) -> Result<Arc<Instance>, ServerError> {
        let instance = self.started_instance(&client.destination)?;
        if !instance.cursor_store().has_subscribed(client)? {
            return Err(ServerError::NotSubscribed(client.clone()));
        }
        Ok(instance)
    }
}

/// Reads from `store` with the wait discipline selected by `timeout`.
fn read(
    store: &dyn EventStore,
    start: Option<&LogPosition>,
    batch_size: usize,
    timeout: Option<Duration>,
) -> Result<Events, StoreError> {
    match timeout {
        None => store.try_get(start, batch_size),
        Some(timeout) if timeout.is_zero() => store.get(start, batch_size),
        Some(timeout) => store.get_timeout(start, batch_size, timeout),
    }
}
