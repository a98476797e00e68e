//! Store registry for resolving persistence adapters by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::BlobStore;
use markvault_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BlobStore>> + Send + Sync>;

/// Registry for blob store factories.
///
/// Allows dynamic registration and resolution of stores by name and
/// configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not registered
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn BlobStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: HashMap<String, StoreFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryStore::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local store requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalStore::new(root)?))
        }),
    );

    StoreRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = StoreRegistry::new();
        assert!(registry.resolve("unknown", Value::Null).is_err());
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.stores(), vec!["local", "memory"]);

        assert!(registry.resolve("local", Value::Null).is_err());

        let temp = tempfile::TempDir::new().unwrap();
        let config = serde_json::json!({ "root": temp.path().to_string_lossy() });
        let store = registry.resolve("local", config).unwrap();
        assert_eq!(store.name(), "local");
    }
}
