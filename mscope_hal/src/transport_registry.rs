//! Registry of bus transports.
//!
//! Provides a `TransportRegistry` that maps transport names (the
//! `[stage] transport` config value) to factories. Built at startup and
//! handed to `StageCore`, so tests can register fakes without global state.

use mscope_common::stage::bus::{BusError, BusTransport, TransportFactory};
use mscope_common::stage::config::StageConfig;
use std::collections::HashMap;
use tracing::warn;

/// Registry of available bus transports.
pub struct TransportRegistry {
    factories: HashMap<&'static str, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in transport.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::transports::register_all_transports(&mut registry);
        registry
    }

    /// Register a transport factory.
    ///
    /// Returns `false` and keeps the existing entry if `name` is taken.
    pub fn register(&mut self, name: &'static str, factory: TransportFactory) -> bool {
        if self.factories.contains_key(name) {
            warn!("Transport '{name}' is already registered");
            return false;
        }
        self.factories.insert(name, factory);
        true
    }

    /// Get a transport factory by name.
    pub fn get_factory(&self, name: &str) -> Option<TransportFactory> {
        self.factories.get(name).copied()
    }

    /// Create a transport instance by name.
    ///
    /// # Errors
    /// Returns `BusError::TransportNotFound` if nothing is registered under `name`.
    pub fn create(
        &self,
        name: &str,
        config: &StageConfig,
    ) -> Result<Box<dyn BusTransport>, BusError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| BusError::TransportNotFound(name.to_string()))?;
        Ok(factory(config))
    }

    /// List all registered transport names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
