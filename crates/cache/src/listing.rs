//! The read-through listing cache front.

use crate::store::{StoreHandle, Tag, Tags};
use bucketfs_storage::ObjectRecord;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Default entry lifetime: one hour.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Which listing of a folder an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Files,
    Folders,
}
impl EntryKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Folders => "folders",
        }
    }

    fn tag(self) -> Tag {
        match self {
            Self::Files => Tag::File,
            Self::Folders => Tag::Folder,
        }
    }
}

/// Maps `(scope, folder identifier)` to the folder's file records and,
/// separately, to its sub-folder identifiers.
///
/// Entries are tagged `file` or `folder` and invalidated a whole tag at a
/// time. Store failures never reach the caller: they are logged and treated
/// as a miss.
///
/// While the cache is disabled (or suppressed, see [`suppress`](Self::suppress))
/// every get is a forced miss and every set is a no-op. Flushes still go
/// through, so stale entries written before the switch was flipped cannot
/// outlive a mutation.
pub struct ListingCache {
    scope: String,
    store: StoreHandle,
    lifetime: Duration,
    enabled: AtomicBool,
    suppressions: AtomicUsize,
    deferred: AtomicU8,
    generation: AtomicU64,
}

impl ListingCache {
    pub fn new(scope: impl Into<String>, store: StoreHandle) -> Self {
        Self {
            scope: scope.into(),
            store,
            lifetime: DEFAULT_LIFETIME,
            enabled: AtomicBool::new(true),
            suppressions: AtomicUsize::new(0),
            deferred: AtomicU8::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Start out disabled (the configuration switch for turning caching
    /// off entirely).
    pub fn disabled(self) -> Self {
        self.enabled.store(false, Ordering::SeqCst);
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Counter bumped by every flush. Holders of derived in-process state
    /// compare it against the value they captured to detect invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Whether gets and sets currently reach the store.
    pub fn is_active(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.suppressions.load(Ordering::SeqCst) == 0
    }

    /// Cache key for one folder: the digest keeps arbitrary identifier
    /// characters out of the key and caps its length.
    pub fn key(&self, kind: EntryKind, folder: &str) -> String {
        let digest = blake3::hash(folder.as_bytes()).to_hex();
        format!("storage-{}-{}-{}", self.scope, kind.as_str(), &digest[..32])
    }

    pub async fn get_files(&self, folder: &str) -> Option<Vec<ObjectRecord>> {
        self.get(EntryKind::Files, folder).await
    }

    pub async fn set_files(&self, folder: &str, records: &[ObjectRecord]) {
        self.set(EntryKind::Files, folder, records).await
    }

    pub async fn get_folders(&self, folder: &str) -> Option<Vec<String>> {
        self.get(EntryKind::Folders, folder).await
    }

    pub async fn set_folders(&self, folder: &str, identifiers: &[String]) {
        self.set(EntryKind::Folders, folder, identifiers).await
    }

    pub async fn flush_file_tag(&self) {
        self.flush_tags(Tags::FILE).await
    }

    pub async fn flush_folder_tag(&self) {
        self.flush_tags(Tags::FOLDER).await
    }

    pub async fn flush_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(scope = %self.scope, "Flushing whole listing cache");
        if let Err(err) = self.store.flush().await {
            tracing::warn!(scope = %self.scope, error = %err, "Cache store flush failed");
        }
    }

    /// Flush every tag in `tags`. Flushing both tags is a full flush.
    pub async fn flush_tags(&self, tags: Tags) {
        if tags == Tags::ALL {
            return self.flush_all().await;
        }
        if tags.is_empty() {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        for tag in [Tag::File, Tag::Folder] {
            if !tags.contains(tag) {
                continue;
            }
            tracing::debug!(scope = %self.scope, tag = tag.as_str(), "Flushing listing cache tag");
            if let Err(err) = self.store.flush_tag(tag).await {
                tracing::warn!(scope = %self.scope, tag = tag.as_str(), error = %err, "Cache store flush failed");
            }
        }
    }

    /// Suppress caching until the returned guard is released.
    ///
    /// Brackets multi-object operations: while any suppression is held, gets
    /// miss and sets are dropped, so a half-mutated tree is never memoized.
    /// [`Suppression::release`] re-enables caching and flushes `tags`. A
    /// guard dropped without being released (early return, `?`, panic,
    /// cancelled future) re-enables caching just the same and leaves the
    /// flush to run before the next cache access.
    pub fn suppress(&self, tags: Tags) -> Suppression<'_> {
        self.suppressions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(scope = %self.scope, "Listing cache suppressed");
        Suppression {
            cache: self,
            tags,
            released: false,
        }
    }

    async fn apply_deferred(&self) {
        let pending = Tags::from_bits(self.deferred.swap(0, Ordering::SeqCst));
        if !pending.is_empty() {
            tracing::debug!(scope = %self.scope, "Applying deferred listing cache flush");
            self.flush_tags(pending).await;
        }
    }

    async fn get<T: DeserializeOwned>(&self, kind: EntryKind, folder: &str) -> Option<T> {
        self.apply_deferred().await;
        if !self.is_active() {
            return None;
        }
        let key = self.key(kind, folder);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(scope = %self.scope, folder, kind = kind.as_str(), "Listing cache miss");
                return None;
            },
            Err(err) => {
                tracing::warn!(scope = %self.scope, folder, error = %err, "Cache store read failed, treating as miss");
                return None;
            },
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(scope = %self.scope, folder, kind = kind.as_str(), "Listing cache hit");
                Some(value)
            },
            Err(err) => {
                tracing::warn!(scope = %self.scope, folder, error = %err, "Undecodable cache entry, treating as miss");
                None
            },
        }
    }

    async fn set<T: Serialize + ?Sized>(&self, kind: EntryKind, folder: &str, value: &T) {
        self.apply_deferred().await;
        if !self.is_active() {
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(scope = %self.scope, folder, error = %err, "Unencodable cache entry, skipping");
                return;
            },
        };
        let key = self.key(kind, folder);
        match self.store.set(&key, raw, kind.tag(), self.lifetime).await {
            Ok(()) => tracing::debug!(scope = %self.scope, folder, kind = kind.as_str(), "Listing cache set"),
            Err(err) => tracing::warn!(scope = %self.scope, folder, error = %err, "Cache store write failed"),
        }
    }
}

/// Scoped "cache suppressed" guard returned by [`ListingCache::suppress`].
#[must_use = "dropping the guard immediately re-enables the cache"]
pub struct Suppression<'a> {
    cache: &'a ListingCache,
    tags: Tags,
    released: bool,
}
impl Suppression<'_> {
    /// Re-enable caching, then flush the guarded tags.
    pub async fn release(mut self) {
        self.released = true;
        self.cache.suppressions.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(scope = %self.cache.scope, "Listing cache suppression released");
        self.cache.flush_tags(self.tags).await;
    }
}
impl Drop for Suppression<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.cache.suppressions.fetch_sub(1, Ordering::SeqCst);
        self.cache.deferred.fetch_or(self.tags.bits(), Ordering::SeqCst);
        // Anything derived from the cache is suspect from here on, even
        // before the deferred flush reaches the store.
        self.cache.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(scope = %self.cache.scope, "Listing cache suppression dropped, flush deferred");
    }
}
