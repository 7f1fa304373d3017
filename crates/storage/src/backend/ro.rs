//! Readonly storage backend.
//!
//! Wraps another backend and prevents write operations from executing, while
//! still indicating success on return. Used for dry runs.

use async_trait::async_trait;

use crate::backend::{BoxAsyncRead, ListStream};
use crate::error::Result;
use crate::models::{ObjectRecord, guess_content_type};
use crate::{BackendHandle, StorageBackend, validate_key};

/// Read-only storage backend.
///
/// Silently drops all write operations, logging an
/// [`info event`](tracing::Event). Writes return a synthesized record so
/// callers can carry on as if the write had happened.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }

    fn synthesize(&self, key: &str, size: u64) -> Result<ObjectRecord> {
        let key = validate_key(key)?;
        let content_type = guess_content_type(&key);
        Ok(ObjectRecord::new(key, self.inner.bucket(), size, time::OffsetDateTime::now_utc())
            .with_content_type(content_type))
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn media_prefix(&self) -> Option<String> {
        self.inner.media_prefix()
    }

    async fn upload(&self, key: &str, data: &[u8], _content_type: Option<&str>) -> Result<ObjectRecord> {
        tracing::info!(storage = self.name(), key, bytes = data.len(), "Skipping upload during read-only mode");
        self.synthesize(key, data.len() as u64)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.download(key).await
    }

    async fn reader(&self, key: &str) -> Result<BoxAsyncRead> {
        self.inner.reader(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<ObjectRecord> {
        tracing::info!(storage = self.name(), key = from, to, "Skipping copy during read-only mode");
        let source = self.inner.stat(from).await?;
        self.synthesize(to, source.size)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::info!(storage = self.name(), key, "Skipping delete during read-only mode");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn stat(&self, key: &str) -> Result<ObjectRecord> {
        self.inner.stat(key).await
    }

    fn list_stream<'a>(&'a self, prefix: &'a str, delimiter: Option<char>) -> ListStream<'a> {
        self.inner.list_stream(prefix, delimiter)
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
