//! Upstream parser seam.
//!
//! A parser reads the source change log, decodes it into
//! [`Event`](sluice_core::Event)s and puts them into the instance's store.
//! Decoding lives outside this workspace; the relay only drives parser
//! lifecycle and pushes table filters down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::error::ServerError;

/// Lifecycle and filter contract of an upstream parser.
pub trait EventParser: Send + Sync {
    /// Starts reading the source log.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Parser`] if the parser cannot start.
    fn start(&self) -> Result<(), ServerError>;

    /// Stops reading.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Parser`] if the parser does not shut down
    /// cleanly.
    fn stop(&self) -> Result<(), ServerError>;

    /// Returns `true` while reading.
    fn is_started(&self) -> bool;

    /// Restricts parsing to tables matching `filter`.
    fn set_filter(&self, filter: &str);
}

/// One parser, or a group of parsers feeding the same store.
#[derive(Clone)]
pub enum ParserTopology {
    /// A single source.
    Single(Arc<dyn EventParser>),
    /// Several sources merged into one stream.
    Group(Vec<Arc<dyn EventParser>>),
}

impl ParserTopology {
    fn members(&self) -> &[Arc<dyn EventParser>] {
        match self {
            Self::Single(parser) => std::slice::from_ref(parser),
            Self::Group(parsers) => parsers.as_slice(),
        }
    }

    /// Number of parsers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members().len()
    }

    /// Returns `true` for an empty group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Starts every parser that is not running yet.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; parsers after it are not started.
    pub fn start(&self) -> Result<(), ServerError> {
        for parser in self.members() {
            if !parser.is_started() {
                parser.start()?;
            }
        }
        Ok(())
    }

    /// Stops every parser, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all parsers were asked to stop.
    pub fn stop(&self) -> Result<(), ServerError> {
        let mut first_error = None;
        for parser in self.members() {
            if let Err(e) = parser.stop() {
                error!(error = %e, "failed to stop parser");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns `true` if every parser is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.members().iter().all(|parser| parser.is_started())
    }

    /// Pushes `filter` to every parser.
    pub fn set_filter(&self, filter: &str) {
        for parser in self.members() {
            parser.set_filter(filter);
        }
    }
}

impl std::fmt::Debug for ParserTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("ParserTopology::Single"),
            Self::Group(parsers) => write!(f, "ParserTopology::Group({})", parsers.len()),
        }
    }
}

/// Parser that produces nothing.
///
/// Stands in for a real source: events reach the store through
/// [`Instance::store`](crate::instance::Instance::store) instead.
#[derive(Debug, Default)]
pub struct IdleParser {
    name: String,
    started: AtomicBool,
    filter: Mutex<Option<String>>,
}

impl IdleParser {
    /// Creates a stopped parser.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Last filter pushed down, if any.
    #[must_use]
    pub fn filter(&self) -> Option<String> {
        self.filter.lock().clone()
    }
}

impl EventParser for IdleParser {
    fn start(&self) -> Result<(), ServerError> {
        self.started.store(true, Ordering::Release);
        info!(parser = %self.name, "parser started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ServerError> {
        self.started.store(false, Ordering::Release);
        info!(parser = %self.name, "parser stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn set_filter(&self, filter: &str) {
        *self.filter.lock() = Some(filter.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingParser;

    impl EventParser for FailingParser {
        fn start(&self) -> Result<(), ServerError> {
            Err(ServerError::Parser("source unreachable".to_string()))
        }

        fn stop(&self) -> Result<(), ServerError> {
            Err(ServerError::Parser("already closed".to_string()))
        }

        fn is_started(&self) -> bool {
            false
        }

        fn set_filter(&self, _filter: &str) {}
    }

    #[test]
    fn test_single_lifecycle() {
        let parser = Arc::new(IdleParser::new("p"));
        let topology = ParserTopology::Single(parser.clone());
        assert_eq!(topology.len(), 1);
        assert!(!topology.is_started());

        topology.start().unwrap();
        assert!(parser.is_started());
        topology.set_filter("shop\\..*");
        assert_eq!(parser.filter().as_deref(), Some("shop\\..*"));

        topology.stop().unwrap();
        assert!(!topology.is_started());
    }

    #[test]
    fn test_group_fans_out() {
        let a = Arc::new(IdleParser::new("a"));
        let b = Arc::new(IdleParser::new("b"));
        let members: Vec<Arc<dyn EventParser>> = vec![a.clone(), b.clone()];
        let topology = ParserTopology::Group(members);

        topology.start().unwrap();
        assert!(a.is_started() && b.is_started());
        assert!(topology.is_started());

        topology.set_filter("x\\.y");
        assert_eq!(a.filter().as_deref(), Some("x\\.y"));
        assert_eq!(b.filter().as_deref(), Some("x\\.y"));

        b.stop().unwrap();
        assert!(!topology.is_started());
    }

    #[test]
    fn test_group_stop_continues_past_failure() {
        let idle = Arc::new(IdleParser::new("idle"));
        let members: Vec<Arc<dyn EventParser>> = vec![Arc::new(FailingParser), idle.clone()];
        let topology = ParserTopology::Group(members);
        idle.start().unwrap();

        assert!(matches!(topology.stop(), Err(ServerError::Parser(_))));
        assert!(!idle.is_started());
    }

    #[test]
    fn test_group_start_propagates_failure() {
        let members: Vec<Arc<dyn EventParser>> = vec![Arc::new(FailingParser)];
        let topology = ParserTopology::Group(members);
        assert!(topology.start().is_err());
    }
}
