//! In-memory storage backend for testing.

use super::{BoxAsyncRead, ListStream, delimit};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::{ListEntry, ObjectRecord, guess_content_type};
use crate::path::{validate_key, validate_prefix};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

const GCS_BASE_URL: &str = "https://storage.cloud.google.com";

#[derive(Clone)]
struct MockObject {
    data: Vec<u8>,
    content_type: String,
    created: OffsetDateTime,
    updated: OffsetDateTime,
}

#[derive(Default)]
struct Calls {
    list: AtomicUsize,
    upload: AtomicUsize,
    download: AtomicUsize,
    copy: AtomicUsize,
    delete: AtomicUsize,
    stat: AtomicUsize,
}

/// In-memory storage backend for testing.
///
/// Objects are stored in a `BTreeMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation. Every
/// remote-looking operation is counted, which lets tests assert how many
/// backend round trips a driver operation cost. Keys can be marked as
/// failing to exercise error paths.
///
/// Media links use the Google Cloud Storage "authenticated URL" shape
/// (`https://storage.cloud.google.com/<bucket>/<key>`).
///
/// # Examples
///
/// ```
/// use bucketfs_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("photos/image.jpg", b"jpeg bytes"),
/// ]);
/// assert!(backend.exists("photos/image.jpg").await?);
///
/// backend.upload("photos/other.jpg", b"more bytes", None).await?;
/// assert_eq!(backend.list("photos/", Some('/')).await?.objects.len(), 2);
/// assert_eq!(backend.list_calls(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    bucket: String,
    storage: RwLock<BTreeMap<String, MockObject>>,
    failing: RwLock<HashSet<String>>,
    listing_media_links: bool,
    calls: Calls,
}

impl MockBackend {
    /// Create a mock backend pre-populated with objects.
    ///
    /// Panics if any key fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let now = OffsetDateTime::now_utc();
        for (key, data) in files {
            let key = key.into();
            let Ok(validated) = validate_key(&key) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid key {key}");
            };
            let content_type = guess_content_type(&validated);
            map.insert(
                validated,
                MockObject {
                    data: data.into(),
                    content_type,
                    created: now,
                    updated: now,
                },
            );
        }
        Self {
            name: "mock".to_string(),
            bucket: "mock-bucket".to_string(),
            storage: RwLock::new(map),
            failing: RwLock::new(HashSet::new()),
            listing_media_links: true,
            calls: Calls::default(),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change the bucket name reported in records and media links.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Leave `media_link` empty in listing results (but not in `stat`), the
    /// way some list APIs return partial object resources.
    pub fn without_listing_media_links(mut self) -> Self {
        self.listing_media_links = false;
        self
    }

    /// Insert an object with an explicit modification time, bypassing the
    /// call counters.
    pub async fn insert(&self, key: &str, data: impl Into<Vec<u8>>, modified: OffsetDateTime) {
        let Ok(validated) = validate_key(key) else {
            panic!("MockBackend::insert: invalid key {key}");
        };
        let content_type = guess_content_type(&validated);
        self.storage.write().await.insert(
            validated,
            MockObject {
                data: data.into(),
                content_type,
                created: modified,
                updated: modified,
            },
        );
    }

    /// Make every operation touching `key` fail with
    /// [`BackendUnavailable`](ErrorKind::BackendUnavailable).
    pub async fn fail_key(&self, key: impl Into<String>) {
        self.failing.write().await.insert(key.into());
    }

    /// All keys currently stored, in order. Does not count as a call.
    pub async fn keys(&self) -> Vec<String> {
        self.storage.read().await.keys().cloned().collect()
    }

    pub fn list_calls(&self) -> usize {
        self.calls.list.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.calls.upload.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.calls.download.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.calls.copy.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    pub fn stat_calls(&self) -> usize {
        self.calls.stat.load(Ordering::SeqCst)
    }

    fn media_link(&self, key: &str) -> String {
        format!("{GCS_BASE_URL}/{}/{key}", self.bucket)
    }

    fn record(&self, key: &str, object: &MockObject, media_link: bool) -> ObjectRecord {
        let record = ObjectRecord::new(key, &self.bucket, object.data.len() as u64, object.updated)
            .with_created(object.created)
            .with_content_type(&object.content_type);
        match media_link {
            true => record.with_media_link(self.media_link(key)),
            false => record,
        }
    }

    async fn check_failing(&self, key: &str) -> Result<()> {
        if self.failing.read().await.contains(key) {
            exn::bail!(ErrorKind::BackendUnavailable(format!("injected failure for {key}")));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<(String, MockObject)> {
        let key = validate_key(key)?;
        self.check_failing(&key).await?;
        let object = self.storage.read().await.get(&key).cloned();
        match object {
            Some(object) => Ok((key, object)),
            None => exn::bail!(ErrorKind::NotFound(key)),
        }
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: Option<&str>) -> Result<ObjectRecord> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        let key = validate_key(key)?;
        self.check_failing(&key).await?;
        let now = OffsetDateTime::now_utc();
        let object = MockObject {
            data: data.to_vec(),
            content_type: content_type.map(str::to_string).unwrap_or_else(|| guess_content_type(&key)),
            created: now,
            updated: now,
        };
        let record = self.record(&key, &object, true);
        self.storage.write().await.insert(key, object);
        Ok(record)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        let (_key, object) = self.get(key).await?;
        Ok(object.data)
    }

    async fn reader(&self, key: &str) -> Result<BoxAsyncRead> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        let (_key, object) = self.get(key).await?;
        Ok(Box::pin(Cursor::new(object.data)))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<ObjectRecord> {
        self.calls.copy.fetch_add(1, Ordering::SeqCst);
        let (_from, object) = self.get(from).await?;
        let to = validate_key(to)?;
        self.check_failing(&to).await?;
        let now = OffsetDateTime::now_utc();
        let copied = MockObject {
            created: now,
            updated: now,
            ..object
        };
        let record = self.record(&to, &copied, true);
        self.storage.write().await.insert(to, copied);
        Ok(record)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        let key = validate_key(key)?;
        self.check_failing(&key).await?;
        match self.storage.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(key)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        self.check_failing(&key).await?;
        Ok(self.storage.read().await.contains_key(&key))
    }

    async fn stat(&self, key: &str) -> Result<ObjectRecord> {
        self.calls.stat.fetch_add(1, Ordering::SeqCst);
        let (key, object) = self.get(key).await?;
        Ok(self.record(&key, &object, true))
    }

    fn list_stream<'a>(&'a self, prefix: &'a str, delimiter: Option<char>) -> ListStream<'a> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        let prefix = match validate_prefix(prefix) {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let mut prefixes = BTreeSet::new();
            let objects: Vec<ObjectRecord> = {
                let guard = self.storage.read().await;
                guard
                    .range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .filter_map(|(key, object)| match delimit(&prefix, key, delimiter) {
                        Some(sub) => {
                            prefixes.insert(sub.to_string());
                            None
                        },
                        None => Some(self.record(key, object, self.listing_media_links)),
                    })
                    .collect()
            };
            for record in objects {
                yield Ok(ListEntry::Object(record));
            }
            for sub in prefixes {
                yield Ok(ListEntry::Prefix(sub));
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_upload_and_download() {
        let backend = MockBackend::default();
        let record = backend.upload("test.txt", b"hello", None).await.unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.content_type.as_deref(), Some("text/plain"));
        assert_eq!(record.media_link.as_deref(), Some("https://storage.cloud.google.com/mock-bucket/test.txt"));
        assert_eq!(backend.download("test.txt").await.unwrap(), b"hello");
        assert_eq!(backend.upload_calls(), 1);
        assert_eq!(backend.download_calls(), 1);
    }

    #[tokio::test]
    async fn test_reader_streams_contents() {
        let backend = MockBackend::with_files([("a/b.bin", Vec::from(*b"0123456789"))]);
        let mut reader = backend.reader("a/b.bin").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"0123456789");
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let backend = MockBackend::default();
        let err = backend.download("missing.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_copy() {
        let backend = MockBackend::with_files([("old.txt", Vec::from(*b"data"))]);
        let record = backend.copy("old.txt", "dir/new.txt").await.unwrap();
        assert_eq!(record.key, "dir/new.txt");
        assert!(backend.exists("old.txt").await.unwrap());
        assert_eq!(backend.download("dir/new.txt").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_copy_not_found() {
        let backend = MockBackend::default();
        let err = backend.copy("missing.txt", "new.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MockBackend::with_files([("file.txt", Vec::from(*b"data"))]);
        backend.delete("file.txt").await.unwrap();
        assert!(!backend.exists("file.txt").await.unwrap());
        let err = backend.delete("file.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert_eq!(backend.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let backend = MockBackend::with_files([
            ("photos/.keep", Vec::new()),
            ("photos/a.jpg", Vec::from(*b"a")),
            ("photos/2024/b.jpg", Vec::from(*b"b")),
            ("photos/2024/c/d.jpg", Vec::from(*b"d")),
            ("photos-archive/e.jpg", Vec::from(*b"e")),
        ]);
        let listing = backend.list("photos/", Some('/')).await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["photos/.keep", "photos/a.jpg"]);
        assert_eq!(listing.prefixes, vec!["photos/2024/".to_string()]);
    }

    #[tokio::test]
    async fn test_list_without_delimiter_is_recursive() {
        let backend = MockBackend::with_files([
            ("photos/a.jpg", Vec::from(*b"a")),
            ("photos/2024/b.jpg", Vec::from(*b"b")),
            ("other/c.jpg", Vec::from(*b"c")),
        ]);
        let listing = backend.list("photos/", None).await.unwrap();
        assert_eq!(listing.objects.len(), 2);
        assert!(listing.prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_list_root() {
        let backend = MockBackend::with_files([("a.txt", Vec::from(*b"a")), ("dir/b.txt", Vec::from(*b"b"))]);
        let listing = backend.list("", Some('/')).await.unwrap();
        assert_eq!(listing.objects.len(), 1);
        assert_eq!(listing.prefixes, vec!["dir/".to_string()]);
    }

    #[tokio::test]
    async fn test_listing_without_media_links() {
        let backend = MockBackend::with_files([("a.txt", Vec::from(*b"a"))]).without_listing_media_links();
        let listing = backend.list("", Some('/')).await.unwrap();
        assert!(listing.objects[0].media_link.is_none());
        assert!(backend.stat("a.txt").await.unwrap().media_link.is_some());
    }

    #[tokio::test]
    async fn test_fail_key() {
        let backend = MockBackend::with_files([("a.txt", Vec::from(*b"a"))]);
        backend.fail_key("a.txt").await;
        let err = backend.download("a.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendUnavailable(_)));
        let err = backend.copy("a.txt", "b.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_key_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.download("../etc/passwd").await.is_err());
        assert!(backend.upload("../escape", b"bad", None).await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid key")]
    fn test_with_files_panics_on_bad_key() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
