//! # Sluice Server
//!
//! Subscription protocol and instance management of the `sluice`
//! change-data-capture relay.
//!
//! - [`EmbeddedServer`]: subscribe, pull batches, ack, roll back
//! - [`Instance`]: store, ledger, cursor store and parsers of one destination
//! - [`InstanceRegistry`]: creates instances on first use
//! - [`Controller`]: builds everything from a [`ServerConfig`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice_server::{Controller, ServerConfig};
//!
//! let controller = Controller::new(ServerConfig::load("sluice.toml")?)?;
//! controller.start()?;
//!
//! let server = controller.server();
//! server.subscribe(&client)?;
//! let message = server.get_without_ack(&client, 100, Some(Duration::from_secs(1)))?;
//! server.ack(&client, message.batch_id)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod controller;
pub mod error;
pub mod instance;
pub mod message;
pub mod parser;
pub mod registry;
pub mod server;

// Re-export key types
pub use config::{InstanceConfig, MetaMode, ServerConfig};
pub use controller::Controller;
pub use error::ServerError;
pub use instance::Instance;
pub use message::{Message, EMPTY_BATCH_ID};
pub use parser::{EventParser, IdleParser, ParserTopology};
pub use registry::{InstanceFactory, InstanceRegistry};
pub use server::EmbeddedServer;

/// Result type for sluice-server operations
pub type Result<T> = std::result::Result<T, ServerError>;
