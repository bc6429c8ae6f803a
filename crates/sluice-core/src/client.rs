//! Subscriber identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// One logical subscriber of one destination.
///
/// Equality and hashing use the destination and client id only: subscribing
/// again with a different filter updates the same subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Destination (instance) name.
    pub destination: String,
    /// Client id, unique within the destination.
    pub client_id: i16,
    /// Table filter expression requested by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ClientIdentity {
    /// Creates an identity without a filter.
    #[must_use]
    pub fn new(destination: impl Into<String>, client_id: i16) -> Self {
        Self {
            destination: destination.into(),
            client_id,
            filter: None,
        }
    }

    /// Sets the filter expression.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Returns the filter if it is non-blank.
    #[must_use]
    pub fn effective_filter(&self) -> Option<&str> {
        self.filter.as_deref().filter(|f| !f.trim().is_empty())
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination && self.client_id == other.client_id
    }
}

impl Eq for ClientIdentity {}

impl Hash for ClientIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
        self.client_id.hash(state);
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.destination, self.client_id)?;
        if let Some(filter) = self.effective_filter() {
            write!(f, "[{filter}]")?;
        }
        Ok(())
    }
}
