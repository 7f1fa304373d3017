//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, a thin façade over a flat
//! object store: put, get, list-by-prefix, copy, delete, exists. It knows
//! nothing about folders; the driver layers those on top using the
//! [`path`](crate::path) codec.

mod local;
#[cfg(feature = "mock")]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::models::{ListEntry, Listing, ObjectRecord};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use tokio::io::AsyncRead;

pub type ListStream<'a> = Pin<Box<dyn Stream<Item = Result<ListEntry>> + Send + 'a>>;
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Unified interface for object-store backends.
///
/// All operations are asynchronous. Keys are relative to the bucket (and to
/// the backend's own key prefix, if it was configured with one) and must be
/// validated with [`validate_key`](crate::validate_key) by implementations
/// before use.
///
/// Backend failures are classified into
/// [`ErrorKind`](crate::error::ErrorKind) at the call site. Nothing in this
/// trait retries; retry policy belongs to whoever drives the backend.
///
/// # Examples
///
/// ```
/// use bucketfs_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_hardcoded_object(backend: &dyn StorageBackend) -> Result<u64> {
///     let key = "photos/image.jpg";
///     if backend.exists(key).await? {
///         Ok(backend.stat(key).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (name taken from the configuration
    /// object key). Used for logging and as the default cache scope.
    fn name(&self) -> &str;

    /// Name of the bucket this backend talks to.
    fn bucket(&self) -> &str;

    /// Canonical prefix of this backend's media links (everything before the
    /// object key), when it differs from the well-known Google Cloud Storage
    /// URL shapes. Public URL rewriting substitutes a configured base URI for
    /// this prefix.
    fn media_prefix(&self) -> Option<String> {
        None
    }

    /// Store `data` at `key`, overwriting any existing object.
    ///
    /// Falls back to a content type guessed from the key when `content_type`
    /// is `None`.
    async fn upload(&self, key: &str, data: &[u8], content_type: Option<&str>) -> Result<ObjectRecord>;

    /// Read the complete object.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// Open an object for streaming reads.
    ///
    /// The async setup (opening the file/request) happens before returning.
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    ///
    /// ```no_run
    /// # use bucketfs_storage::{backend::StorageBackend, error::{ErrorKind, Result}};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut reader = backend.reader("videos/large.mp4").await?;
    /// let mut sink = tokio::io::sink();
    /// tokio::io::copy(&mut reader, &mut sink).await.map_err(ErrorKind::Io)?;
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, key: &str) -> Result<BoxAsyncRead>;

    /// Server-side copy of `from` to `to`, overwriting `to`.
    ///
    /// Returns the metadata of the new object, or
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if the source object
    /// does not exist.
    async fn copy(&self, from: &str, to: &str) -> Result<ObjectRecord>;

    /// Delete an object.
    ///
    /// # Notes
    /// - Backends that can tell (local, mock) return
    ///   [`NotFound`](crate::error::ErrorKind::NotFound) for a missing
    ///   object; S3-compatible services report success either way.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get object metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn stat(&self, key: &str) -> Result<ObjectRecord>;

    /// Stream the objects (and, with a delimiter, the sub-prefixes) under
    /// `prefix`.
    ///
    /// With `delimiter = Some('/')` only objects directly under `prefix` are
    /// returned, plus one [`ListEntry::Prefix`] per "virtual sub-folder".
    /// Without a delimiter every object whose key starts with `prefix` is
    /// returned and no prefixes are. Backend paging is followed transparently;
    /// callers never see continuation tokens.
    ///
    /// # Notes
    /// - The empty prefix lists from the bucket root.
    /// - [`list()`](Self::list) is a convenience wrapper that collects this
    ///   stream into a [`Listing`] via
    ///   [`TryStreamExt`](futures::TryStreamExt::try_collect).
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use bucketfs_storage::ListEntry;
    /// # use bucketfs_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream("photos/", Some('/'));
    /// while let Some(entry) = stream.try_next().await? {
    ///     match entry {
    ///         ListEntry::Object(record) => println!("{}: {} bytes", record.key, record.size),
    ///         ListEntry::Prefix(prefix) => println!("{prefix} (folder)"),
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: &'a str, delimiter: Option<char>) -> ListStream<'a>;

    /// Collect [`list_stream()`](Self::list_stream) into a [`Listing`].
    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing> {
        self.list_stream(prefix, delimiter).try_collect().await
    }

    /// Connection test: succeeds when the bucket is reachable with the
    /// configured credentials.
    async fn ping(&self) -> Result<()>;
}

/// Split `key` (already known to start with `prefix`) into either a direct
/// child object or the sub-prefix one level deeper than `prefix`.
///
/// Shared by the backends that emulate delimiter listings themselves.
pub(crate) fn delimit<'k>(prefix: &str, key: &'k str, delimiter: Option<char>) -> Option<&'k str> {
    let delimiter = delimiter?;
    let rest = key.get(prefix.len()..)?;
    rest.find(delimiter).map(|idx| &key[..prefix.len() + idx + delimiter.len_utf8()])
}
