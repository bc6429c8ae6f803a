//! Destination → instance registry with factory pattern.
//!
//! Instances are created on first use through the registered factory and
//! cached until removed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ServerError;
use crate::instance::Instance;

/// Factory function type for creating instances by destination name.
pub type InstanceFactory =
    Arc<dyn Fn(&str) -> Result<Arc<Instance>, ServerError> + Send + Sync>;

/// Cache of live instances.
///
/// # Example
///
/// ```rust,ignore
/// let registry = InstanceRegistry::new(Arc::new(|dest| {
///     Ok(Arc::new(Instance::in_memory(dest, StoreConfig::default())))
/// }));
/// let instance = registry.get_or_create("example")?;
/// ```
#[derive(Clone)]
pub struct InstanceRegistry {
    factory: InstanceFactory,
    instances: Arc<RwLock<HashMap<String, Arc<Instance>>>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(factory: InstanceFactory) -> Self {
        Self {
            factory,
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the cached instance, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, typically
    /// [`ServerError::UnknownDestination`].
    pub fn get_or_create(&self, destination: &str) -> Result<Arc<Instance>, ServerError> {
        if let Some(instance) = self.instances.read().get(destination) {
            return Ok(Arc::clone(instance));
        }
        let mut instances = self.instances.write();
        if let Some(instance) = instances.get(destination) {
            return Ok(Arc::clone(instance));
        }
        let instance = (self.factory)(destination)?;
        instances.insert(destination.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Returns the cached instance, if any.
    #[must_use]
    pub fn get(&self, destination: &str) -> Option<Arc<Instance>> {
        self.instances.read().get(destination).cloned()
    }

    /// Removes and returns the cached instance.
    pub fn remove(&self, destination: &str) -> Option<Arc<Instance>> {
        self.instances.write().remove(destination)
    }

    /// Cached destination names, sorted.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every cached instance.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.instances.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("destinations", &self.destinations())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sluice_core::StoreConfig;

    use super::*;

    fn counting_registry() -> (InstanceRegistry, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let registry = InstanceRegistry::new(Arc::new(move |dest: &str| {
            if dest == "missing" {
                return Err(ServerError::UnknownDestination(dest.to_string()));
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Instance::in_memory(dest, StoreConfig::with_buffer_size(8))))
        }));
        (registry, created)
    }

    #[test]
    fn test_get_or_create_caches() {
        let (registry, created) = counting_registry();
        let a = registry.get_or_create("example").unwrap();
        let b = registry.get_or_create("example").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.destinations(), vec!["example".to_string()]);
    }

    #[test]
    fn test_factory_error_is_not_cached() {
        let (registry, created) = counting_registry();
        assert!(matches!(
            registry.get_or_create("missing"),
            Err(ServerError::UnknownDestination(_))
        ));
        assert!(registry.get("missing").is_none());
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_recreates() {
        let (registry, created) = counting_registry();
        let first = registry.get_or_create("example").unwrap();
        assert!(registry.remove("example").is_some());
        assert!(registry.get("example").is_none());

        let second = registry.get_or_create("example").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(registry.instances().len(), 1);
    }
}
