//! In-memory subscription table shared by the cursor store backends.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use sluice_core::{ClientIdentity, LogPosition};

/// One subscriber and its cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    /// Subscriber.
    pub client: ClientIdentity,
    /// Last acknowledged transaction-safe position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<LogPosition>,
}

/// Everything persisted for one destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationMeta {
    /// Destination name.
    pub destination: String,
    /// Subscribers in subscription order.
    #[serde(default)]
    pub clients: Vec<ClientMeta>,
}

impl DestinationMeta {
    fn find(&self, client: &ClientIdentity) -> Option<&ClientMeta> {
        self.clients.iter().find(|meta| &meta.client == client)
    }

    fn find_mut(&mut self, client: &ClientIdentity) -> Option<&mut ClientMeta> {
        self.clients.iter_mut().find(|meta| &meta.client == client)
    }
}

/// Destination name → metadata.
#[derive(Debug, Default)]
pub(crate) struct MetaTable {
    destinations: FxHashMap<String, DestinationMeta>,
}

impl MetaTable {
    pub(crate) fn insert(&mut self, meta: DestinationMeta) {
        self.destinations.insert(meta.destination.clone(), meta);
    }

    pub(crate) fn destination(&self, destination: &str) -> Option<&DestinationMeta> {
        self.destinations.get(destination)
    }

    pub(crate) fn clear(&mut self) {
        self.destinations.clear();
    }

    pub(crate) fn subscribe(&mut self, client: &ClientIdentity) {
        let meta = self
            .destinations
            .entry(client.destination.clone())
            .or_insert_with(|| DestinationMeta {
                destination: client.destination.clone(),
                clients: Vec::new(),
            });
        match meta.find_mut(client) {
            // same identity, possibly a new filter
            Some(existing) => existing.client = client.clone(),
            None => meta.clients.push(ClientMeta {
                client: client.clone(),
                cursor: None,
            }),
        }
    }

    /// Returns `true` if the subscription existed.
    pub(crate) fn unsubscribe(&mut self, client: &ClientIdentity) -> bool {
        let Some(meta) = self.destinations.get_mut(&client.destination) else {
            return false;
        };
        let before = meta.clients.len();
        meta.clients.retain(|existing| &existing.client != client);
        before != meta.clients.len()
    }

    pub(crate) fn has_subscribed(&self, client: &ClientIdentity) -> bool {
        self.destination(&client.destination)
            .is_some_and(|meta| meta.find(client).is_some())
    }

    pub(crate) fn list_subscribers(&self, destination: &str) -> Vec<ClientIdentity> {
        self.destination(destination)
            .map(|meta| meta.clients.iter().map(|c| c.client.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn cursor(&self, client: &ClientIdentity) -> Option<LogPosition> {
        self.destination(&client.destination)
            .and_then(|meta| meta.find(client))
            .and_then(|meta| meta.cursor.clone())
    }

    /// Stores the cursor; an unknown client is subscribed implicitly.
    pub(crate) fn update_cursor(&mut self, client: &ClientIdentity, position: &LogPosition) {
        if !self.has_subscribed(client) {
            self.subscribe(client);
        }
        if let Some(meta) = self
            .destinations
            .get_mut(&client.destination)
            .and_then(|meta| meta.find_mut(client))
        {
            meta.cursor = Some(position.clone());
        }
    }
}
