//! Module contract and registry
//!
//! Every producer/consumer implementation satisfies the [`Module`] trait.
//! Consumers additionally expose [`Consumer`] through `as_consumer`; the
//! router refuses to connect a module that does not. Producers that push
//! rather than get polled receive an [`EventSink`] to hand parsed payloads
//! to the router.
//!
//! Discovery is an explicit registration table - a mapping from module kind
//! to a factory closure - instead of any runtime loading. The daemon
//! registers its built-in kinds at startup; tests register their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{error, info};

use crate::event::{Event, Payload, SourceId};
use crate::modes::Classification;

/// A consumer's event-handling surface.
///
/// Errors stay on the dispatching task's handle; they never travel back into
/// the router.
pub trait Consumer: Send + Sync {
    fn handle_event(&self, event: Arc<Event>) -> Result<()>;
}

/// Handle a push producer uses to emit events into the router
#[derive(Clone)]
pub struct EventSink {
    source: SourceId,
    deliver: Arc<dyn Fn(&SourceId, Payload) + Send + Sync>,
}

impl EventSink {
    pub fn new(
        source: SourceId,
        deliver: Arc<dyn Fn(&SourceId, Payload) + Send + Sync>,
    ) -> Self {
        Self { source, deliver }
    }

    /// Hand one parsed payload to the router. Never blocks on dispatch.
    pub fn emit(&self, payload: Payload) {
        (self.deliver)(&self.source, payload);
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }
}

/// The contract every producer/consumer module satisfies
pub trait Module: Send + Sync {
    /// Unique instance name; doubles as the routing source id for producers
    fn name(&self) -> &str;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Producer-side classification, consulted at connect time
    fn classification(&self) -> Classification {
        Classification::Unknown
    }

    /// Apply new configuration live, without a restart
    fn update_config(&self, _config: Value) -> Result<()> {
        Ok(())
    }

    /// Upstream classification pushed in by connection setup
    fn set_input_classification(&self, _classification: Classification) {}

    /// Install the sink a push producer emits through
    fn set_event_sink(&self, _sink: EventSink) {}

    /// The consumer surface, if this module handles events
    fn as_consumer(self: Arc<Self>) -> Option<Arc<dyn Consumer>> {
        None
    }
}

/// Factory building a module instance from its name and JSON config
pub type ModuleFactory = Box<dyn Fn(&str, Value) -> Result<Arc<dyn Module>> + Send + Sync>;

/// Explicit registration table plus the live instance set
pub struct ModuleRegistry {
    factories: Mutex<HashMap<String, ModuleFactory>>,
    instances: Mutex<HashMap<String, Arc<dyn Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a factory for `kind`, replacing any previous one
    pub fn register_factory(&self, kind: impl Into<String>, factory: ModuleFactory) {
        self.factories.lock().unwrap().insert(kind.into(), factory);
    }

    /// Build and record an instance of `kind` named `name`
    pub fn create(&self, kind: &str, name: &str, config: Value) -> Result<Arc<dyn Module>> {
        if self.instances.lock().unwrap().contains_key(name) {
            return Err(anyhow!("module instance '{name}' already exists"));
        }
        let module = {
            let factories = self.factories.lock().unwrap();
            let factory = factories
                .get(kind)
                .ok_or_else(|| anyhow!("unknown module kind '{kind}'"))?;
            factory(name, config)?
        };
        self.instances
            .lock()
            .unwrap()
            .insert(name.to_string(), module.clone());
        info!(kind, name, "module created");
        Ok(module)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.instances.lock().unwrap().get(name).cloned()
    }

    /// Drop an instance; its connections go stale and are cleaned up lazily
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.instances.lock().unwrap().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.instances.lock().unwrap().keys().cloned().collect()
    }

    /// Start every instance; the first failure aborts startup
    pub fn start_all(&self) -> Result<()> {
        let instances: Vec<_> = self.instances.lock().unwrap().values().cloned().collect();
        for module in instances {
            module
                .start()
                .map_err(|e| anyhow!("failed to start module '{}': {e:#}", module.name()))?;
        }
        Ok(())
    }

    /// Stop every instance; failures are logged and the rest still stop
    pub fn stop_all(&self) {
        let instances: Vec<_> = self.instances.lock().unwrap().values().cloned().collect();
        for module in instances {
            if let Err(e) = module.stop() {
                error!(module = module.name(), error = %e, "module failed to stop");
            }
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullModule {
        name: String,
    }

    impl Module for NullModule {
        fn name(&self) -> &str {
            &self.name
        }
        fn start(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn null_factory() -> ModuleFactory {
        Box::new(|name, _config| {
            Ok(Arc::new(NullModule {
                name: name.to_string(),
            }) as Arc<dyn Module>)
        })
    }

    #[test]
    fn test_create_and_get() {
        let registry = ModuleRegistry::new();
        registry.register_factory("null", null_factory());

        let module = registry.create("null", "a", Value::Null).unwrap();
        assert_eq!(module.name(), "a");
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let registry = ModuleRegistry::new();
        assert!(registry.create("mystery", "a", Value::Null).is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = ModuleRegistry::new();
        registry.register_factory("null", null_factory());
        registry.create("null", "a", Value::Null).unwrap();
        assert!(registry.create("null", "a", Value::Null).is_err());
    }

    #[test]
    fn test_default_module_is_not_a_consumer() {
        let registry = ModuleRegistry::new();
        registry.register_factory("null", null_factory());
        let module = registry.create("null", "a", Value::Null).unwrap();
        assert!(module.as_consumer().is_none());
    }
}
