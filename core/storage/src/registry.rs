//! Provider registry for resolving a backend from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::local::LocalProvider;
use crate::memory::MemoryProvider;
use crate::provider::StorageProvider;
use crate::remote::RemoteProvider;
use stowage_common::{Error, Result, StorageConfig};

/// Factory function type for creating providers.
pub type ProviderFactory =
    Box<dyn Fn(&StorageConfig) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

/// Kind every unknown provider kind falls back to.
pub const FALLBACK_KIND: &str = LocalProvider::NAME;

/// Remote kinds registered by [`create_default_registry`].
pub const REMOTE_KINDS: &[&str] = &["azure", "s3"];

/// Registry for storage provider factories.
///
/// Kinds are matched case-insensitively. Resolving a kind that is not
/// registered falls back to the local provider instead of failing.
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
    /// - Returns error if `kind` is already registered
    pub fn register(&mut self, kind: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let kind = kind.into().to_ascii_lowercase();
        if self.factories.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Resolve a provider by kind and configuration.
    ///
    /// # Errors
    /// - Neither `kind` nor the fallback kind is registered
    /// - The factory rejects the configuration
    pub fn resolve(&self, kind: &str, config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
        let normalized = kind.trim().to_ascii_lowercase();
        let factory = match self.factories.get(&normalized) {
            Some(factory) => factory,
            None => {
                warn!(kind = %kind, fallback = FALLBACK_KIND, "Unknown provider kind, using fallback");
                self.factories.get(FALLBACK_KIND).ok_or_else(|| {
                    Error::NotFound(format!("Provider '{}' is not registered", FALLBACK_KIND))
                })?
            }
        };

        let provider = factory(config)?;
        debug!(provider = provider.name(), "Storage provider resolved");
        Ok(provider)
    }

    /// Get list of registered provider kinds.
    pub fn providers(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a provider kind is registered.
    pub fn has_provider(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_ascii_lowercase())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers.
pub fn create_default_registry() -> ProviderRegistry {
    let mut factories: HashMap<String, ProviderFactory> = HashMap::new();

    factories.insert(LocalProvider::NAME.to_string(), Box::new(local_factory));
    factories.insert(MemoryProvider::NAME.to_string(), Box::new(memory_factory));

    for kind in REMOTE_KINDS {
        factories.insert(
            kind.to_string(),
            Box::new(
                move |config: &StorageConfig| -> Result<Arc<dyn StorageProvider>> {
                    Ok(Arc::new(RemoteProvider::new(
                        *kind,
                        config.provider.remote.clone(),
                    )))
                },
            ),
        );
    }

    ProviderRegistry { factories }
}

fn local_factory(config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
    Ok(Arc::new(LocalProvider::new(
        &config.provider.base_dir,
        config.integrity,
    )))
}

fn memory_factory(config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
    Ok(Arc::new(MemoryProvider::new(config.integrity)))
}

/// Resolve the provider named by `config.provider.kind` from the default registry.
pub fn select_provider(config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
    create_default_registry().resolve(&config.provider.kind, config)
}
