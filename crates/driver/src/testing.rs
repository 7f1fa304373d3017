//! Fixtures shared by the driver's unit tests.

use crate::{Driver, DriverConfig};
use bucketfs_cache::MemoryStore;
use bucketfs_storage::backend::MockBackend;
use std::sync::Arc;

pub(crate) fn driver_from(mock: MockBackend, config: DriverConfig) -> (Arc<MockBackend>, Driver) {
    let mock = Arc::new(mock);
    let driver = Driver::new(mock.clone(), Arc::new(MemoryStore::new()), config);
    (mock, driver)
}

pub(crate) fn driver_with_config<K, V>(
    files: impl IntoIterator<Item = (K, V)>,
    configure: impl FnOnce(DriverConfig) -> DriverConfig,
) -> (Arc<MockBackend>, Driver)
where
    K: Into<String>,
    V: Into<Vec<u8>>,
{
    driver_from(MockBackend::with_files(files), configure(DriverConfig::new("fileadmin")))
}

pub(crate) fn driver_with<K, V>(files: impl IntoIterator<Item = (K, V)>) -> (Arc<MockBackend>, Driver)
where
    K: Into<String>,
    V: Into<Vec<u8>>,
{
    driver_with_config(files, |config| config)
}

pub(crate) fn driver() -> (Arc<MockBackend>, Driver) {
    driver_from(MockBackend::default(), DriverConfig::new("fileadmin"))
}
