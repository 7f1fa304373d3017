use crate::error::{ErrorKind, Result};
use crate::info::{FileInfo, FolderInfo, Permissions, hash_identifier};
use crate::listing::ListOptions;
use crate::sanitize::sanitize_file_name;
use bucketfs_cache::{DEFAULT_LIFETIME, ListingCache, StoreHandle};
use bucketfs_storage::path::{
    ROOT, SEPARATOR, canonical_folder, combine_folder_and_file, combine_folder_and_folder_name,
    compute_file_identifier, final_folder_identifier, folder_prefix, is_marker, normalize, parent_folder,
};
use bucketfs_storage::{BackendHandle, ObjectRecord};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-scope driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Storage scope name. Also namespaces listing cache keys.
    pub scope: String,
    /// Substituted for the backend's URL prefix in public URLs.
    pub base_uri: Option<String>,
    /// Where local copies of remote files are written.
    pub local_dir: PathBuf,
    pub cache_enabled: bool,
    pub cache_lifetime: Duration,
}
impl DriverConfig {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            base_uri: None,
            local_dir: std::env::temp_dir().join("bucketfs"),
            cache_enabled: true,
            cache_lifetime: DEFAULT_LIFETIME,
        }
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn with_local_dir(mut self, local_dir: impl Into<PathBuf>) -> Self {
        self.local_dir = local_dir.into();
        self
    }

    pub fn with_cache(mut self, enabled: bool, lifetime: Duration) -> Self {
        self.cache_enabled = enabled;
        self.cache_lifetime = lifetime;
        self
    }
}

/// Listings already seen by this driver instance, valid for one cache
/// flush generation.
#[derive(Default)]
struct Memo {
    generation: u64,
    files: HashMap<String, Vec<ObjectRecord>>,
    folders: HashMap<String, Vec<String>>,
}

/// Folder/file tree over a flat object store.
///
/// Folders are derived from key prefixes, made to exist on their own by a
/// zero-byte `.keep` marker object. Listings are read through two layers: an
/// in-process memo and the shared [`ListingCache`]. Every mutation flushes
/// the relevant cache tag before touching the backend, and recursive
/// operations run with the cache suppressed.
///
/// Backend calls within one operation are issued one after another.
/// Separate operations against the same scope (from this process or any
/// other) are not coordinated.
pub struct Driver {
    pub(crate) backend: BackendHandle,
    pub(crate) cache: ListingCache,
    pub(crate) config: DriverConfig,
    cancel: CancellationToken,
    memo: RwLock<Memo>,
}

impl Driver {
    pub fn new(backend: BackendHandle, store: StoreHandle, config: DriverConfig) -> Self {
        let cache = ListingCache::new(&config.scope, store).with_lifetime(config.cache_lifetime);
        let cache = match config.cache_enabled {
            true => cache,
            false => cache.disabled(),
        };
        Self {
            backend,
            cache,
            config,
            cancel: CancellationToken::new(),
            memo: RwLock::new(Memo::default()),
        }
    }

    /// Stop recursive operations when `token` is cancelled. Without one they
    /// run to completion.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn scope(&self) -> &str {
        &self.config.scope
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn cache(&self) -> &ListingCache {
        &self.cache
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn root_level_folder(&self) -> &'static str {
        ROOT
    }

    pub fn default_folder(&self) -> &'static str {
        ROOT
    }

    pub fn sanitize_file_name(&self, name: &str) -> Result<String> {
        sanitize_file_name(name)
    }

    pub fn hash(&self, identifier: &str) -> String {
        hash_identifier(identifier)
    }

    pub fn get_permissions(&self, _identifier: &str) -> Permissions {
        Permissions::default()
    }

    pub async fn test_connection(&self) -> Result<()> {
        self.backend.ping().await.map_err(ErrorKind::storage)
    }

    /// Drop every listing cache entry.
    pub async fn flush_cache(&self) {
        self.cache.flush_all().await;
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }

    /// Object key for a file identifier.
    pub(crate) fn file_key(identifier: &str) -> Result<String> {
        match normalize(identifier) {
            key if key.is_empty() || identifier.ends_with(SEPARATOR) => {
                exn::bail!(ErrorKind::InvalidIdentifier(identifier.to_string()))
            },
            key => Ok(key),
        }
    }

    async fn memo_get<T: Clone>(&self, pick: impl FnOnce(&Memo) -> Option<&T>) -> Option<T> {
        if !self.cache.is_active() {
            return None;
        }
        let memo = self.memo.read().await;
        if memo.generation != self.cache.generation() {
            return None;
        }
        pick(&memo).cloned()
    }

    async fn memo_put(&self, generation: u64, store: impl FnOnce(&mut Memo)) {
        // A flush that landed while we were fetching makes the result suspect.
        if !self.cache.is_active() || self.cache.generation() != generation {
            return;
        }
        let mut memo = self.memo.write().await;
        if memo.generation != generation {
            memo.files.clear();
            memo.folders.clear();
            memo.generation = generation;
        }
        store(&mut memo);
    }

    /// One delimiter listing of `folder`: its files (markers dropped, media
    /// links filled in) and its direct sub-folders.
    async fn fetch_folder(&self, folder: &str) -> Result<(Vec<ObjectRecord>, Vec<String>)> {
        tracing::debug!(storage = %self.scope(), folder, "Listing folder from backend");
        let listing = self.backend.list(&folder_prefix(folder), Some(SEPARATOR)).await.map_err(ErrorKind::storage)?;
        let mut files = Vec::with_capacity(listing.objects.len());
        for record in listing.objects {
            if is_marker(&record.key) || record.key.ends_with(SEPARATOR) {
                continue;
            }
            let record = match record.media_link {
                Some(_) => record,
                None => self.backend.stat(&record.key).await.map_err(ErrorKind::storage)?,
            };
            files.push(record);
        }
        files.sort_by(|a, b| a.key.cmp(&b.key));
        let mut folders: Vec<String> = listing.prefixes.iter().map(|prefix| canonical_folder(prefix)).collect();
        folders.sort();
        folders.dedup();
        Ok((files, folders))
    }

    async fn fetch_and_remember(&self, folder: &str) -> Result<(Vec<ObjectRecord>, Vec<String>)> {
        let generation = self.cache.generation();
        let (files, folders) = self.fetch_folder(folder).await?;
        self.cache.set_files(folder, &files).await;
        self.cache.set_folders(folder, &folders).await;
        self.memo_put(generation, |memo| {
            memo.files.insert(folder.to_string(), files.clone());
            memo.folders.insert(folder.to_string(), folders.clone());
        })
        .await;
        Ok((files, folders))
    }

    /// File records directly inside `folder`, sorted by key.
    pub(crate) async fn files_of(&self, folder: &str) -> Result<Vec<ObjectRecord>> {
        let folder = canonical_folder(folder);
        if let Some(files) = self.memo_get(|memo| memo.files.get(&folder)).await {
            return Ok(files);
        }
        if let Some(files) = self.cache.get_files(&folder).await {
            let generation = self.cache.generation();
            self.memo_put(generation, |memo| {
                memo.files.insert(folder.clone(), files.clone());
            })
            .await;
            return Ok(files);
        }
        Ok(self.fetch_and_remember(&folder).await?.0)
    }

    /// Identifiers of the folders directly inside `folder`, sorted.
    pub(crate) async fn folders_of(&self, folder: &str) -> Result<Vec<String>> {
        let folder = canonical_folder(folder);
        if let Some(folders) = self.memo_get(|memo| memo.folders.get(&folder)).await {
            return Ok(folders);
        }
        if let Some(folders) = self.cache.get_folders(&folder).await {
            let generation = self.cache.generation();
            self.memo_put(generation, |memo| {
                memo.folders.insert(folder.clone(), folders.clone());
            })
            .await;
            return Ok(folders);
        }
        Ok(self.fetch_and_remember(&folder).await?.1)
    }

    /// `folder` followed by all of its descendants, depth-first.
    pub(crate) async fn folder_tree(&self, folder: &str) -> Result<Vec<String>> {
        let mut tree = Vec::new();
        let mut stack = vec![canonical_folder(folder)];
        while let Some(current) = stack.pop() {
            let children = self.folders_of(&current).await?;
            stack.extend(children.into_iter().rev());
            tree.push(current);
        }
        Ok(tree)
    }

    /// Record for one file from a listing this driver already holds, without
    /// asking the backend.
    async fn known_record(&self, key: &str) -> Option<ObjectRecord> {
        let folder = parent_folder(key);
        let pick = |files: &[ObjectRecord]| files.iter().find(|record| record.key == key).cloned();
        if let Some(record) = self.memo_get(|memo| memo.files.get(&folder)).await.and_then(|files| pick(&files)) {
            return Some(record);
        }
        self.cache.get_files(&folder).await.and_then(|files| pick(&files))
    }

    pub(crate) async fn object_record(&self, identifier: &str) -> Result<ObjectRecord> {
        let key = Self::file_key(identifier)?;
        if let Some(record) = self.known_record(&key).await {
            return Ok(record);
        }
        self.backend.stat(&key).await.map_err(ErrorKind::storage)
    }

    pub async fn list_files_in_folder(&self, folder: &str, options: &ListOptions) -> Result<Vec<String>> {
        let records = match options.recursive {
            false => self.files_of(folder).await?,
            true => {
                let mut records = Vec::new();
                for current in self.folder_tree(folder).await? {
                    records.extend(self.files_of(&current).await?);
                }
                records
            },
        };
        Ok(options.apply_to_files(records))
    }

    pub async fn list_folders_in_folder(&self, folder: &str, options: &ListOptions) -> Result<Vec<String>> {
        let folders = match options.recursive {
            false => self.folders_of(folder).await?,
            true => self.folder_tree(folder).await?.into_iter().skip(1).collect(),
        };
        Ok(options.apply_to_folders(folders))
    }

    pub async fn count_files_in_folder(&self, folder: &str, recursive: bool) -> Result<usize> {
        let options = ListOptions::new().recursive(recursive);
        Ok(self.list_files_in_folder(folder, &options).await?.len())
    }

    pub async fn count_folders_in_folder(&self, folder: &str, recursive: bool) -> Result<usize> {
        let options = ListOptions::new().recursive(recursive);
        Ok(self.list_folders_in_folder(folder, &options).await?.len())
    }

    /// Folder identifiers and the root are never files.
    pub async fn file_exists(&self, identifier: &str) -> Result<bool> {
        let Ok(key) = Self::file_key(identifier) else {
            return Ok(false);
        };
        self.backend.exists(&key).await.map_err(ErrorKind::storage)
    }

    /// A folder exists when its marker object does. The root always exists.
    pub async fn folder_exists(&self, folder: &str) -> Result<bool> {
        if canonical_folder(folder) == ROOT {
            return Ok(true);
        }
        self.backend.exists(&final_folder_identifier(folder)).await.map_err(ErrorKind::storage)
    }

    pub fn file_in_folder(&self, name: &str, folder: &str) -> String {
        compute_file_identifier(&combine_folder_and_file(folder, name))
    }

    pub fn folder_in_folder(&self, name: &str, folder: &str) -> String {
        combine_folder_and_folder_name(folder, name)
    }

    pub async fn file_exists_in_folder(&self, name: &str, folder: &str) -> Result<bool> {
        self.file_exists(&self.file_in_folder(name, folder)).await
    }

    pub async fn folder_exists_in_folder(&self, name: &str, folder: &str) -> Result<bool> {
        self.folder_exists(&self.folder_in_folder(name, folder)).await
    }

    pub async fn get_file_info(&self, identifier: &str) -> Result<FileInfo> {
        let record = self.object_record(identifier).await?;
        Ok(FileInfo::from_record(&record, self.scope()))
    }

    pub async fn get_folder_info(&self, folder: &str) -> Result<FolderInfo> {
        if !self.folder_exists(folder).await? {
            exn::bail!(ErrorKind::NotFound(canonical_folder(folder)));
        }
        Ok(FolderInfo::new(folder, self.scope()))
    }

    /// Neither files nor sub-folders (marker objects don't count).
    pub async fn is_folder_empty(&self, folder: &str) -> Result<bool> {
        Ok(self.files_of(folder).await?.is_empty() && self.folders_of(folder).await?.is_empty())
    }

    pub fn is_within(&self, container: &str, candidate: &str) -> bool {
        bucketfs_storage::path::is_within(container, candidate)
    }
}
