//! Turning configuration into live backends, drivers and stores.

use crate::error::{ErrorKind, Result};
use bucketfs_cache::{MemoryStore, SqliteStore, StoreHandle};
use bucketfs_config::{Config, StorageConfig, StorageKind};
use bucketfs_driver::{Driver, DriverConfig};
use bucketfs_storage::BackendHandle;
use bucketfs_storage::backend::{LocalBackend, ReadOnlyBackend};
use exn::ResultExt;
use std::sync::Arc;

/// Shared listing cache store. Falls back to a process-local store when the
/// database can't be opened: the cache is never needed for correctness.
pub async fn store(config: &Config) -> StoreHandle {
    let Some(path) = config.cache_path() else {
        tracing::warn!("No cache directory available, caching in memory only");
        return Arc::new(MemoryStore::new());
    };
    match SqliteStore::connect(&path).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %*err, "Cache database unavailable, caching in memory only");
            Arc::new(MemoryStore::new())
        },
    }
}

pub async fn backend(storage: &StorageConfig) -> Result<BackendHandle> {
    let opened = || ErrorKind::Storage(storage.name.clone());
    let backend: BackendHandle = match storage.kind {
        StorageKind::Local => {
            let root = storage.require("root").or_raise(opened)?;
            Arc::new(LocalBackend::new(&storage.name, root).or_raise(opened)?)
        },
        #[cfg(feature = "s3")]
        StorageKind::S3 => Arc::new(
            bucketfs_storage::backend::S3Backend::new(
                &storage.name,
                storage.require("bucket").or_raise(opened)?,
                storage.optional("prefix").map(str::to_string),
                storage.optional("region").map(str::to_string),
                storage.optional("endpoint").map(str::to_string),
                storage.require("key_id").or_raise(opened)?,
                storage.require("key_secret").or_raise(opened)?,
            )
            .await
            .or_raise(opened)?,
        ),
        #[cfg(not(feature = "s3"))]
        StorageKind::S3 => exn::bail!(ErrorKind::Storage(storage.name.clone())),
    };
    Ok(backend)
}

pub fn driver(config: &Config, storage: &StorageConfig, backend: BackendHandle, store: StoreHandle) -> Driver {
    let mut driver_config =
        DriverConfig::new(&storage.name).with_cache(config.cache.enabled, config.cache.lifetime());
    if let Some(base_uri) = storage.optional("base_uri") {
        driver_config = driver_config.with_base_uri(base_uri);
    }
    Driver::new(backend, store, driver_config)
}

/// Open a configured storage as a driver. With `dry_run`, writes are
/// dropped by a [`ReadOnlyBackend`].
pub async fn open(config: &Config, name: &str, store: StoreHandle, dry_run: bool) -> Result<Driver> {
    let storage = config.storage(name).or_raise(|| ErrorKind::Storage(name.to_string()))?;
    let mut backend = backend(storage).await?;
    if dry_run {
        backend = Arc::new(ReadOnlyBackend::new(backend));
    }
    Ok(driver(config, storage, backend, store))
}
