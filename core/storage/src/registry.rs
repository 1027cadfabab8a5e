//! Provider registry for dynamic provider resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::TokenSource;
use crate::provider::RemoteStorage;
use veilvault_common::{Error, Result};

/// Everything a factory needs to build a provider for one account.
#[derive(Clone)]
pub struct ProviderContext {
    /// Provider-specific configuration.
    pub config: Value,
    /// Bearer tokens for the account.
    pub tokens: Arc<dyn TokenSource>,
}

/// Factory function type for creating providers.
pub type ProviderFactory =
    Box<dyn Fn(ProviderContext) -> Result<Arc<dyn RemoteStorage>> + Send + Sync>;

/// Registry of storage provider factories keyed by provider id.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - Returns error if the id is already registered
    pub fn register(&mut self, id: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let id = id.into();
        if self.factories.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                id
            )));
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    /// Build a provider instance.
    ///
    /// # Errors
    /// - Provider not registered
    /// - Configuration invalid
    pub fn resolve(&self, id: &str, ctx: ProviderContext) -> Result<Arc<dyn RemoteStorage>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("No provider registered for '{}'", id)))?;
        factory(ctx)
    }

    /// Registered provider ids, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_provider(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers (`memory`, `gdrive`).
pub fn create_default_registry() -> ProviderRegistry {
    let mut factories: HashMap<String, ProviderFactory> = HashMap::new();
    factories.insert(
        "memory".to_string(),
        Box::new(|_ctx| Ok(Arc::new(crate::memory::MemoryStorage::new()))),
    );
    factories.insert(
        "gdrive".to_string(),
        Box::new(crate::gdrive::create_gdrive_provider),
    );
    ProviderRegistry { factories }
}
