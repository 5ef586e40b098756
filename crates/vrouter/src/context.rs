//! Explicit application context, built once by the dispatcher and handed to
//! every command.

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::registry::OverlayRegistry;
use crate::store::{CoordinationStore, Store};

/// Everything a command needs to talk to the coordination store
#[derive(Clone)]
pub struct AppContext {
    /// Application configuration
    pub config: AppConfig,

    /// Registry over the configured store backend
    pub registry: OverlayRegistry<Store>,
}

impl AppContext {
    /// Connect to the configured store
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = Store::connect(
            &config.store_url,
            &config.registry_prefix,
            config.request_timeout(),
        )
        .await
        .with_context(|| format!("Failed to connect to store at {}", config.store_url))?;

        let registry = OverlayRegistry::new(store, config.registry_prefix.clone());
        Ok(Self { config, registry })
    }

    /// Build a context over an existing store
    #[cfg(test)]
    pub fn with_store(config: AppConfig, store: Store) -> Self {
        let registry = OverlayRegistry::new(store, config.registry_prefix.clone());
        Self { config, registry }
    }

    pub fn store(&self) -> &Store {
        self.registry.store()
    }

    /// Check the store answers before running a command
    pub async fn ping(&self) -> Result<()> {
        self.store()
            .ping()
            .await
            .with_context(|| format!("{} store not reachable", self.store().backend()))
    }
}
