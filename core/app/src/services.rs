//! Composition root.
//!
//! [`Services`] owns the single cipher engine, provider registry and task
//! queue of the process and hands out [`VaultFileSystem`]s for vault records.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use veilvault_common::{AccountId, Error, Result};
use veilvault_crypto::CipherEngine;
use veilvault_storage::{
    create_default_registry, ProviderContext, ProviderRegistry, RemoteStorage, TokenSource,
};
use veilvault_tasks::TaskQueue;
use veilvault_vault::{Vault, VaultFileSystem, VaultRecord};

/// A remote account as supplied by the account store and identity provider.
#[derive(Clone)]
pub struct Account {
    pub id: AccountId,
    /// Provider id in the registry, e.g. `gdrive`.
    pub provider: String,
    pub tokens: Arc<dyn TokenSource>,
}

/// Process-wide services.
pub struct Services {
    config: AppConfig,
    engine: CipherEngine,
    registry: ProviderRegistry,
    tasks: TaskQueue,
    storages: RwLock<HashMap<AccountId, Arc<dyn RemoteStorage>>>,
}

impl Services {
    /// Start the cipher engine and build the default provider registry.
    pub async fn start(config: AppConfig) -> Result<Self> {
        Self::start_with_registry(config, create_default_registry()).await
    }

    pub async fn start_with_registry(config: AppConfig, registry: ProviderRegistry) -> Result<Self> {
        let engine = CipherEngine::start_with(config.engine.clone()).await?;
        info!(providers = ?registry.providers(), "Services started");
        Ok(Self {
            config,
            engine,
            registry,
            tasks: TaskQueue::new(),
            storages: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &CipherEngine {
        &self.engine
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Build the storage adapter for `account` and keep it for later vaults.
    ///
    /// Connecting an already connected account returns the existing adapter.
    pub fn connect_account(&self, account: &Account) -> Result<Arc<dyn RemoteStorage>> {
        if let Some(existing) = self.storages.read().get(&account.id) {
            return Ok(Arc::clone(existing));
        }
        let storage = self.registry.resolve(
            &account.provider,
            ProviderContext {
                config: self.config.provider_config(&account.provider),
                tokens: Arc::clone(&account.tokens),
            },
        )?;
        info!(account_id = %account.id, provider = %account.provider, "Account connected");
        Ok(Arc::clone(
            self.storages
                .write()
                .entry(account.id.clone())
                .or_insert(storage),
        ))
    }

    /// Use an already built adapter for `account_id`.
    pub fn attach_storage(&self, account_id: AccountId, storage: Arc<dyn RemoteStorage>) {
        self.storages.write().insert(account_id, storage);
    }

    pub fn disconnect_account(&self, account_id: &AccountId) -> bool {
        self.storages.write().remove(account_id).is_some()
    }

    fn storage_for(&self, account_id: &AccountId) -> Result<Arc<dyn RemoteStorage>> {
        self.storages
            .read()
            .get(account_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Account not connected: {}", account_id)))
    }

    /// File system for a vault whose passwords are already revealed.
    pub fn file_system(&self, vault: Vault) -> Result<VaultFileSystem> {
        let storage = self.storage_for(&vault.account_id)?;
        Ok(VaultFileSystem::new(Arc::new(vault), self.engine.clone(), storage))
    }

    /// Reveal a stored vault record and open its file system.
    pub async fn open_vault(&self, record: &VaultRecord) -> Result<VaultFileSystem> {
        let vault = record.open(&self.engine).await?;
        self.file_system(vault)
    }

    /// Persistence form of `vault`, with passwords obscured.
    pub async fn seal_vault(&self, vault: &Vault) -> Result<VaultRecord> {
        VaultRecord::seal(vault, &self.engine).await
    }

    /// Stop the cipher engine. Pending and later cipher calls fail with
    /// `EngineTerminated`.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        info!("Services shut down");
    }
}
