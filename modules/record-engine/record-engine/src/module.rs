//! Record engine assembly.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use recordkit_db::{DbProvider, InMemoryStorage, StoragePort};
use tracing::info;

use crate::config::{DatabaseKind, EngineConfig};
use crate::domain::collection::{Collection, ObjectStoreHandle, Paging};
use crate::domain::error::{ConfigError, DomainError};
use crate::domain::plugins::PluginRegistry;
use crate::domain::ports::ObjectStorePort;
use crate::domain::registry::ModelRegistry;
use crate::infra::{AesGcmCipher, EncryptionKey, SignedUrlObjectStore};

/// A running record engine: compiled models bound to their storage.
///
/// Cloning is cheap; clones share state.
#[derive(Clone, Debug)]
pub struct RecordEngine {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<ModelRegistry>,
    databases: BTreeMap<String, DbProvider>,
    stores: Arc<BTreeMap<String, ObjectStoreHandle>>,
    paging: Paging,
}

impl RecordEngine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> RecordEngineBuilder {
        RecordEngineBuilder::new(config)
    }

    /// The collection serving `model`, with permissions enforced.
    ///
    /// # Errors
    /// [`DomainError::NotFound`] for an unknown model.
    pub fn collection(&self, model: &str) -> Result<Collection, DomainError> {
        let descriptor = self
            .inner
            .registry
            .get(model)
            .ok_or_else(|| DomainError::not_found(format!("Collection '{model}' not found")))?;
        let db = self.inner.databases.get(&descriptor.database).ok_or_else(|| {
            DomainError::internal(format!("database '{}' is not available", descriptor.database))
        })?;
        Ok(Collection::new(
            Arc::clone(descriptor),
            Arc::clone(&self.inner.registry),
            db.clone(),
            Arc::clone(&self.inner.stores),
            self.inner.paging,
        ))
    }

    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.inner.registry.names().map(str::to_owned).collect()
    }

    #[must_use]
    pub fn models(&self) -> &ModelRegistry {
        &self.inner.registry
    }
}

/// Wires configuration, plugins and storage into a [`RecordEngine`].
///
/// Memory databases and configured object stores are created automatically.
/// External databases must be supplied with [`storage`](Self::storage).
pub struct RecordEngineBuilder {
    config: EngineConfig,
    plugins: Option<PluginRegistry>,
    storages: BTreeMap<String, Arc<dyn StoragePort>>,
    object_stores: BTreeMap<String, Arc<dyn ObjectStorePort>>,
}

impl RecordEngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            plugins: None,
            storages: BTreeMap::new(),
            object_stores: BTreeMap::new(),
        }
    }

    /// Plugins to resolve model references against. Defaults to every
    /// statically registered plugin.
    #[must_use]
    pub fn plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Some(plugins);
        self
    }

    #[must_use]
    pub fn storage(mut self, database: impl Into<String>, storage: Arc<dyn StoragePort>) -> Self {
        self.storages.insert(database.into(), storage);
        self
    }

    /// Replace the configured object store `name` with a custom port.
    #[must_use]
    pub fn object_store(mut self, name: impl Into<String>, port: Arc<dyn ObjectStorePort>) -> Self {
        self.object_stores.insert(name.into(), port);
        self
    }

    /// # Errors
    /// - [`ConfigError::Database`] for an external database without storage
    /// - [`ConfigError::ObjectStore`] for invalid object store settings
    /// - [`ConfigError::Encryption`] for a missing or malformed encryption key
    /// - any model compilation error
    /// - [`ConfigError::Storage`] when table initialisation fails
    pub async fn build(mut self) -> Result<RecordEngine, ConfigError> {
        let mut plugins = match self.plugins.take() {
            Some(p) => p,
            None => PluginRegistry::builder().include_registered().build()?,
        };
        self.register_encryption_keys(&mut plugins)?;
        let databases = self.databases()?;
        let stores = self.object_stores()?;

        let specs = self.config.model_specs()?;
        let database_names: BTreeSet<String> = databases.keys().cloned().collect();
        let store_names: BTreeSet<String> = stores.keys().cloned().collect();
        let registry = ModelRegistry::compile(&specs, &plugins, &database_names, &store_names)?;

        for db in self.config.databases.iter().filter(|d| d.auto_initialize) {
            let Some(provider) = databases.get(&db.name) else {
                continue;
            };
            for model in registry.iter().filter(|m| m.database == db.name) {
                provider.ensure_table(&model.table).await?;
                tracing::debug!(model = %model.name, table = %model.table.name, "table ready");
            }
        }

        let paging = Paging {
            default_limit: self.config.default_page_size.min(self.config.max_page_size),
            max_limit: self.config.max_page_size,
        };

        info!(
            models = registry.len(),
            databases = databases.len(),
            object_stores = stores.len(),
            "record engine initialized"
        );

        Ok(RecordEngine {
            inner: Arc::new(Inner {
                registry: Arc::new(registry),
                databases,
                stores: Arc::new(stores),
                paging,
            }),
        })
    }

    fn databases(&mut self) -> Result<BTreeMap<String, DbProvider>, ConfigError> {
        let mut databases = BTreeMap::new();
        for db in &self.config.databases {
            if databases.contains_key(&db.name) {
                return Err(ConfigError::Duplicate {
                    kind: "database",
                    name: db.name.clone(),
                });
            }
            let storage = match (self.storages.remove(&db.name), db.kind) {
                (Some(s), _) => s,
                (None, DatabaseKind::Memory) => Arc::new(InMemoryStorage::new()) as Arc<dyn StoragePort>,
                (None, DatabaseKind::External) => {
                    return Err(ConfigError::Database {
                        database: db.name.clone(),
                        message: "external database has no storage attached".to_owned(),
                    });
                }
            };
            databases.insert(db.name.clone(), DbProvider::new(storage));
        }
        if let Some(name) = self.storages.keys().next() {
            return Err(ConfigError::Database {
                database: name.clone(),
                message: "storage supplied for an undeclared database".to_owned(),
            });
        }
        Ok(databases)
    }

    fn register_encryption_keys(&self, plugins: &mut PluginRegistry) -> Result<(), ConfigError> {
        for entry in &self.config.encryption_keys {
            let key = EncryptionKey::from_hex(&entry.name, &entry.secret()?)?;
            plugins.insert_cipher(entry.name.clone(), Arc::new(AesGcmCipher::new(&key)))?;
            tracing::debug!(cipher = %entry.name, "encryption key registered");
        }
        Ok(())
    }

    fn object_stores(&mut self) -> Result<BTreeMap<String, ObjectStoreHandle>, ConfigError> {
        let mut stores = BTreeMap::new();
        for os in &self.config.object_stores {
            let port = match self.object_stores.remove(&os.name) {
                Some(port) => port,
                None => {
                    let (access_key, secret) = os.credentials()?;
                    Arc::new(SignedUrlObjectStore::new(
                        &os.name,
                        &os.endpoint_url,
                        access_key,
                        secret,
                    )?) as Arc<dyn ObjectStorePort>
                }
            };
            let handle = ObjectStoreHandle {
                port,
                ttl: Duration::from_secs(os.presign_ttl_secs),
            };
            if stores.insert(os.name.clone(), handle).is_some() {
                return Err(ConfigError::Duplicate {
                    kind: "object store",
                    name: os.name.clone(),
                });
            }
        }
        if let Some(name) = self.object_stores.keys().next() {
            return Err(ConfigError::ObjectStore {
                store: name.clone(),
                message: "port supplied for an undeclared object store".to_owned(),
            });
        }
        Ok(stores)
    }
}
