//! Wires a [`ServerConfig`] into a running [`EmbeddedServer`].

use std::sync::Arc;

use sluice_core::RingBufferStore;
use sluice_storage::{CursorStore, FileCursorStore, MemoryCursorStore};
use tracing::info;

use crate::config::{MetaMode, ServerConfig};
use crate::error::ServerError;
use crate::instance::Instance;
use crate::parser::{IdleParser, ParserTopology};
use crate::registry::{InstanceFactory, InstanceRegistry};
use crate::server::EmbeddedServer;

/// Owns the server built from a configuration.
#[derive(Debug)]
pub struct Controller {
    config: Arc<ServerConfig>,
    server: Arc<EmbeddedServer>,
}

impl Controller {
    /// Builds the server; nothing is started yet.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the configuration is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = InstanceRegistry::new(instance_factory(Arc::clone(&config)));
        Ok(Self {
            config,
            server: Arc::new(EmbeddedServer::new(registry)),
        })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The managed server.
    #[must_use]
    pub fn server(&self) -> &Arc<EmbeddedServer> {
        &self.server
    }

    /// Starts the server and every non-lazy destination.
    ///
    /// # Errors
    ///
    /// Returns the first destination start failure.
    pub fn start(&self) -> Result<(), ServerError> {
        self.server.start();
        for name in self.config.destination_names() {
            let lazy = self
                .config
                .instance_config(&name)
                .is_some_and(|instance| instance.lazy);
            if lazy {
                info!(destination = %name, "lazy destination, not started");
                continue;
            }
            self.server.start_destination(&name)?;
        }
        info!(
            id = self.config.server.id,
            ip = %self.config.server.ip,
            port = self.config.server.port,
            destinations = ?self.server.registry().destinations(),
            "controller started"
        );
        Ok(())
    }

    /// Stops every destination and the server.
    pub fn stop(&self) {
        self.server.stop();
        info!("controller stopped");
    }
}

/// Creates instances for configured destinations only.
fn instance_factory(config: Arc<ServerConfig>) -> InstanceFactory {
    Arc::new(move |destination: &str| -> Result<Arc<Instance>, ServerError> {
        let instance_config = config
            .instance_config(destination)
            .ok_or_else(|| ServerError::UnknownDestination(destination.to_string()))?;
        let cursor_store: Arc<dyn CursorStore> = match config.meta.mode {
            MetaMode::Memory => Arc::new(MemoryCursorStore::new()),
            MetaMode::File => Arc::new(FileCursorStore::new(&config.meta.data_dir)),
        };
        let parser = ParserTopology::Single(Arc::new(IdleParser::new(destination)));
        Ok(Arc::new(Instance::new(
            destination,
            Arc::new(RingBufferStore::new(instance_config.store_config())),
            cursor_store,
            parser,
        )))
    })
}

#[cfg(test)]
mod tests {
    use sluice_core::ClientIdentity;

    use super::*;

    fn config(toml: &str) -> ServerConfig {
        ServerConfig::from_toml_str(toml).unwrap()
    }

    #[test]
    fn test_starts_non_lazy_destinations() {
        let controller = Controller::new(config(
            r"
            [destinations.eager]
            [destinations.deferred]
            lazy = true
            ",
        ))
        .unwrap();
        controller.start().unwrap();

        let server = controller.server();
        assert!(server.is_running());
        assert!(server.is_started("eager"));
        assert!(!server.is_started("deferred"));

        server.start_destination("deferred").unwrap();
        assert!(server.is_started("deferred"));

        controller.stop();
        assert!(!server.is_started("eager"));
        assert!(!server.is_running());
    }

    #[test]
    fn test_unknown_destination() {
        let controller = Controller::new(config("[destinations.known]\n")).unwrap();
        controller.start().unwrap();
        assert!(matches!(
            controller.server().start_destination("other"),
            Err(ServerError::UnknownDestination(_))
        ));
    }

    #[test]
    fn test_file_meta_mode_persists_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[meta]\nmode = \"file\"\ndata_dir = {:?}\n\n[destinations.example]\n",
            dir.path().display().to_string()
        );

        let client = ClientIdentity::new("example", 1001);
        let controller = Controller::new(config(&toml)).unwrap();
        controller.start().unwrap();
        controller.server().subscribe(&client).unwrap();
        controller.stop();

        let restarted = Controller::new(config(&toml)).unwrap();
        restarted.start().unwrap();
        assert_eq!(
            restarted.server().list_all_subscribe("example").unwrap(),
            vec![client]
        );
    }
}
