//! Folder operations.
//!
//! Folders only exist as key prefixes plus a `.keep` marker object, so every
//! recursive operation is a walk over many objects. These walks are not
//! atomic: a failure part way leaves the objects already handled as they
//! are, and the error carries a [`Progress`] describing them. The listing
//! cache is suppressed for the duration so a half-mutated tree is never
//! memoized.

use crate::driver::Driver;
use crate::error::{ErrorKind, IdentifierMap, Progress, Result};
use crate::sanitize::sanitize_file_name;
use bucketfs_cache::Tags;
use bucketfs_storage::ObjectRecord;
use bucketfs_storage::path::{
    ROOT, SEPARATOR, canonical_folder, combine_folder_and_folder_name, compute_file_identifier,
    final_folder_identifier, folder_prefix, is_marker, is_within, normalize, parent_folder,
};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

impl Driver {
    /// Create `name` inside `parent` by writing its marker object.
    ///
    /// With `recursive`, `name` may contain separators and a marker is
    /// written for every level. Each segment is sanitized. Creating a folder
    /// that already exists is harmless.
    pub async fn create_folder(&self, name: &str, parent: &str, recursive: bool) -> Result<String> {
        let segments = match recursive {
            false => vec![sanitize_file_name(name)?],
            true => name
                .split(SEPARATOR)
                .filter(|segment| !segment.trim().is_empty())
                .map(sanitize_file_name)
                .collect::<Result<Vec<_>>>()?,
        };
        if segments.is_empty() {
            exn::bail!(ErrorKind::InvalidFileName(name.to_string()));
        }

        self.cache.flush_folder_tag().await;
        let mut folder = canonical_folder(parent);
        for segment in segments {
            folder = combine_folder_and_folder_name(&folder, &segment);
            self.write_marker(&folder).await?;
        }
        Ok(folder)
    }

    /// Make sure `folder` and all of its ancestors have marker objects,
    /// keeping the identifier exactly as given.
    pub async fn ensure_folder(&self, folder: &str) -> Result<String> {
        let folder = canonical_folder(folder);
        let mut missing = Vec::new();
        let mut current = folder.clone();
        while current != ROOT && !self.folder_exists(&current).await? {
            let parent = parent_folder(&current);
            missing.push(current);
            current = parent;
        }
        if !missing.is_empty() {
            self.cache.flush_folder_tag().await;
        }
        for folder in missing.iter().rev() {
            self.write_marker(folder).await?;
        }
        Ok(folder)
    }

    async fn write_marker(&self, folder: &str) -> Result<()> {
        let marker = final_folder_identifier(folder);
        tracing::info!(storage = %self.scope(), folder, key = %marker, "Creating folder marker");
        self.backend.upload(&marker, &[], None).await.map_err(ErrorKind::storage)?;
        Ok(())
    }

    /// Delete a folder.
    ///
    /// Without `recursive` the folder must be empty (apart from its marker).
    /// With it, every object under the folder is deleted, sub-folder markers
    /// included.
    #[instrument(skip(self), fields(storage = %self.scope()))]
    pub async fn delete_folder(&self, folder: &str, recursive: bool) -> Result<()> {
        let folder = canonical_folder(folder);
        if folder == ROOT {
            exn::bail!(ErrorKind::InvalidIdentifier(folder));
        }
        if !recursive && !self.is_folder_empty(&folder).await? {
            exn::bail!(ErrorKind::FolderNotEmpty(folder));
        }

        let guard = self.cache.suppress(Tags::ALL);
        let mut progress = Progress::default();
        let result = self.delete_tree(&folder, &mut progress).await;
        guard.release().await;
        match result {
            Ok(()) => {
                tracing::info!(deleted = progress.deleted.len(), "Deleted folder");
                Ok(())
            },
            Err(err) => Err(err.raise(ErrorKind::PartialFailure(progress))),
        }
    }

    async fn delete_tree(&self, folder: &str, progress: &mut Progress) -> Result<()> {
        for (_, objects) in self.snapshot_tree(folder).await? {
            for record in objects {
                self.check_cancelled()?;
                tracing::info!(storage = %self.scope(), key = %record.key, "Deleting object");
                self.backend.delete(&record.key).await.map_err(ErrorKind::storage)?;
                progress.deleted.push(compute_file_identifier(&record.key));
            }
        }
        Ok(())
    }

    /// Every object under `folder`, grouped per folder, depth-first.
    ///
    /// The whole tree is enumerated before anything is mutated. Reads the
    /// backend directly: callers hold a cache suppression.
    async fn snapshot_tree(&self, folder: &str) -> Result<Vec<(String, Vec<ObjectRecord>)>> {
        let mut tree = Vec::new();
        let mut stack = vec![canonical_folder(folder)];
        while let Some(current) = stack.pop() {
            let listing =
                self.backend.list(&folder_prefix(&current), Some(SEPARATOR)).await.map_err(ErrorKind::storage)?;
            let mut children: Vec<String> = listing.prefixes.iter().map(|prefix| canonical_folder(prefix)).collect();
            children.sort();
            children.dedup();
            stack.extend(children.into_iter().rev());
            tree.push((current, listing.objects));
        }
        Ok(tree)
    }

    /// Copy `source` (recursively) to `name` inside `target_parent`.
    ///
    /// Returns old → new identifiers for every file copied; marker objects
    /// are copied but not reported.
    pub async fn copy_folder_within_storage(
        &self,
        source: &str,
        target_parent: &str,
        name: &str,
    ) -> Result<IdentifierMap> {
        self.transfer_folder(source, target_parent, name, Transfer::Copy).await
    }

    /// Move `source` (recursively) to `name` inside `target_parent`.
    ///
    /// Each object is copied and then its source deleted. Returns old → new
    /// identifiers for every file moved.
    pub async fn move_folder_within_storage(
        &self,
        source: &str,
        target_parent: &str,
        name: &str,
    ) -> Result<IdentifierMap> {
        self.transfer_folder(source, target_parent, name, Transfer::Move).await
    }

    /// Rename a folder in place: a move into its own parent.
    pub async fn rename_folder(&self, folder: &str, new_name: &str) -> Result<IdentifierMap> {
        let name = sanitize_file_name(new_name)?;
        self.move_folder_within_storage(folder, &parent_folder(folder), &name).await
    }

    #[instrument(skip(self), fields(storage = %self.scope()))]
    async fn transfer_folder(
        &self,
        source: &str,
        target_parent: &str,
        name: &str,
        mode: Transfer,
    ) -> Result<IdentifierMap> {
        let source = canonical_folder(source);
        if source == ROOT {
            exn::bail!(ErrorKind::InvalidIdentifier(source));
        }
        if normalize(name).is_empty() {
            exn::bail!(ErrorKind::InvalidFileName(name.to_string()));
        }
        let destination = combine_folder_and_folder_name(target_parent, name);
        if is_within(&source, &destination) {
            exn::bail!(ErrorKind::InvalidIdentifier(destination));
        }

        let guard = self.cache.suppress(Tags::ALL);
        let mut progress = Progress::default();
        let result = self.transfer_tree(&source, &destination, mode, &mut progress).await;
        guard.release().await;
        match result {
            Ok(()) => {
                tracing::info!(destination, files = progress.mapped.len(), "Transferred folder");
                Ok(progress.mapped)
            },
            Err(err) => Err(err.raise(ErrorKind::PartialFailure(progress))),
        }
    }

    async fn transfer_tree(&self, source: &str, destination: &str, mode: Transfer, progress: &mut Progress) -> Result<()> {
        let marker = final_folder_identifier(destination);
        if !self.backend.exists(&marker).await.map_err(ErrorKind::storage)? {
            self.write_marker(destination).await?;
        }

        let source_prefix = folder_prefix(source);
        let destination_prefix = folder_prefix(destination);
        for (_, objects) in self.snapshot_tree(source).await? {
            for record in objects {
                // Zero-byte "directory" objects some tools create.
                if record.key.ends_with(SEPARATOR) {
                    continue;
                }
                let Some(relative) = record.key.strip_prefix(&source_prefix) else {
                    continue;
                };
                self.check_cancelled()?;
                let target = format!("{destination_prefix}{relative}");
                tracing::info!(storage = %self.scope(), from = %record.key, to = %target, "Copying object");
                self.backend.copy(&record.key, &target).await.map_err(ErrorKind::storage)?;
                if !is_marker(&record.key) {
                    progress.mapped.insert(compute_file_identifier(&record.key), compute_file_identifier(&target));
                }
                if mode == Transfer::Move {
                    tracing::info!(storage = %self.scope(), key = %record.key, "Deleting moved object");
                    self.backend.delete(&record.key).await.map_err(ErrorKind::storage)?;
                    progress.deleted.push(compute_file_identifier(&record.key));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, IdentifierMap};
    use crate::testing::{driver, driver_from, driver_with};
    use crate::{DriverConfig, ListOptions};
    use bucketfs_storage::backend::MockBackend;
    use tokio_util::sync::CancellationToken;

    const TREE: [(&str, &str); 7] = [
        ("photos/.keep", ""),
        ("photos/a.jpg", "a"),
        ("photos/2024/.keep", ""),
        ("photos/2024/b.jpg", "b"),
        ("photos/2024/summer/c.jpg", "c"),
        ("photos-archive/d.jpg", "d"),
        ("videos/e.mp4", "e"),
    ];

    #[tokio::test]
    async fn test_create_folder() {
        let (mock, driver) = driver();
        let id = driver.create_folder("new folder", "/photos/", false).await.unwrap();
        assert_eq!(id, "/photos/new_folder/");
        assert!(driver.folder_exists(&id).await.unwrap());
        assert_eq!(mock.keys().await, vec!["photos/new_folder/.keep"]);
        // Idempotent.
        driver.create_folder("new folder", "/photos/", false).await.unwrap();
        assert_eq!(mock.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_folder_recursive_writes_every_level() {
        let (mock, driver) = driver();
        let id = driver.create_folder("a/b c/d", "/", true).await.unwrap();
        assert_eq!(id, "/a/b_c/d/");
        assert_eq!(mock.keys().await, vec!["a/.keep", "a/b_c/.keep", "a/b_c/d/.keep"]);
    }

    #[tokio::test]
    async fn test_create_folder_non_recursive_flattens_separators() {
        let (_mock, driver) = driver();
        assert_eq!(driver.create_folder("a/b", "/", false).await.unwrap(), "/a_b/");
        let err = driver.create_folder("//", "/", true).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidFileName(_)));
    }

    #[tokio::test]
    async fn test_new_folder_appears_in_cached_listing() {
        let (_mock, driver) = driver_with(TREE);
        let before = driver.list_folders_in_folder("/photos/", &ListOptions::new()).await.unwrap();
        assert_eq!(before, vec!["/photos/2024/"]);
        driver.create_folder("2025", "/photos/", false).await.unwrap();
        let after = driver.list_folders_in_folder("/photos/", &ListOptions::new()).await.unwrap();
        assert_eq!(after, vec!["/photos/2024/", "/photos/2025/"]);
    }

    #[tokio::test]
    async fn test_ensure_folder_only_writes_missing_markers() {
        let (mock, driver) = driver_with(TREE);
        let id = driver.ensure_folder("/photos/2024/summer/beach").await.unwrap();
        assert_eq!(id, "/photos/2024/summer/beach/");
        assert_eq!(mock.upload_calls(), 2);
        assert!(driver.folder_exists("/photos/2024/summer/").await.unwrap());
        driver.ensure_folder("/photos/2024/summer/beach/").await.unwrap();
        assert_eq!(mock.upload_calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_folder_recursive() {
        let (mock, driver) = driver_with(TREE);
        // Populate caches first; none of it may survive the delete.
        let options = ListOptions::new().recursive(true);
        assert_eq!(driver.list_files_in_folder("/photos/", &options).await.unwrap().len(), 3);

        driver.delete_folder("/photos/", true).await.unwrap();
        assert_eq!(mock.keys().await, vec!["photos-archive/d.jpg", "videos/e.mp4"]);
        assert!(!driver.folder_exists("/photos/").await.unwrap());
        assert!(driver.cache().is_active());
        let root = driver.list_folders_in_folder("/", &ListOptions::new()).await.unwrap();
        assert_eq!(root, vec!["/photos-archive/", "/videos/"]);
    }

    #[tokio::test]
    async fn test_delete_non_empty_folder_requires_recursive() {
        let (mock, driver) = driver_with(TREE);
        let err = driver.delete_folder("/photos/2024/", false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FolderNotEmpty(id) if id == "/photos/2024/"));
        assert_eq!(mock.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_empty_folder() {
        let (mock, driver) = driver_with([("empty/.keep", ""), ("other/x.txt", "x")]);
        driver.delete_folder("/empty/", false).await.unwrap();
        assert_eq!(mock.keys().await, vec!["other/x.txt"]);
    }

    #[tokio::test]
    async fn test_delete_root_is_refused() {
        let (mock, driver) = driver_with(TREE);
        let err = driver.delete_folder("/", true).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidIdentifier(_)));
        assert_eq!(mock.keys().await.len(), TREE.len());
    }

    #[tokio::test]
    async fn test_copy_folder() {
        let (mock, driver) = driver_with(TREE);
        let map = driver.copy_folder_within_storage("/photos/", "/backup/", "pics").await.unwrap();
        let expected: IdentifierMap = [
            ("/photos/a.jpg", "/backup/pics/a.jpg"),
            ("/photos/2024/b.jpg", "/backup/pics/2024/b.jpg"),
            ("/photos/2024/summer/c.jpg", "/backup/pics/2024/summer/c.jpg"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
        assert_eq!(map, expected);

        let keys = mock.keys().await;
        assert!(keys.contains(&"backup/pics/.keep".to_string()));
        assert!(keys.contains(&"backup/pics/2024/.keep".to_string()));
        // Sources untouched, sibling with a shared name prefix not copied.
        assert!(keys.contains(&"photos/a.jpg".to_string()));
        assert!(!keys.iter().any(|key| key.starts_with("backup/") && key.ends_with("d.jpg")));

        let options = ListOptions::new().recursive(true);
        let copied = driver.list_files_in_folder("/backup/pics/", &options).await.unwrap();
        assert_eq!(copied.len(), 3);
    }

    #[tokio::test]
    async fn test_move_folder() {
        let (mock, driver) = driver_with(TREE);
        let map = driver.move_folder_within_storage("/photos/2024/", "/archive/", "2024").await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["/photos/2024/summer/c.jpg"], "/archive/2024/summer/c.jpg");
        let keys = mock.keys().await;
        assert!(!keys.iter().any(|key| key.starts_with("photos/2024/")));
        assert!(keys.contains(&"archive/2024/.keep".to_string()));
        assert!(keys.contains(&"photos/a.jpg".to_string()));
        assert!(!driver.folder_exists("/photos/2024/").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_folder() {
        let (mock, driver) = driver_with(TREE);
        let map = driver.rename_folder("/photos/2024/", "year 2024").await.unwrap();
        assert_eq!(map["/photos/2024/b.jpg"], "/photos/year_2024/b.jpg");
        assert!(driver.folder_exists("/photos/year_2024/").await.unwrap());
        assert!(mock.keys().await.contains(&"photos/year_2024/summer/c.jpg".to_string()));
    }

    #[tokio::test]
    async fn test_transfer_into_itself_is_refused() {
        let (mock, driver) = driver_with(TREE);
        let err = driver.copy_folder_within_storage("/photos/", "/photos/2024/", "loop").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidIdentifier(_)));
        let err = driver.move_folder_within_storage("/photos/", "/", "photos").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidIdentifier(_)));
        assert_eq!(mock.copy_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_reports_progress() {
        let (mock, driver) = driver_with(TREE);
        mock.fail_key("photos/2024/summer/c.jpg").await;
        let err = driver.move_folder_within_storage("/photos/", "/", "moved").await.unwrap_err();
        let progress = err.progress().unwrap();
        // Depth-first: photos/ first, then 2024/, then summer/ where it fails.
        assert_eq!(progress.mapped.len(), 2);
        assert!(progress.mapped.contains_key("/photos/a.jpg"));
        assert!(progress.mapped.contains_key("/photos/2024/b.jpg"));
        assert!(progress.deleted.contains(&"/photos/a.jpg".to_string()));
        // Non-atomic: what already moved stays moved, the rest stays put.
        let keys = mock.keys().await;
        assert!(keys.contains(&"moved/a.jpg".to_string()));
        assert!(keys.contains(&"photos/2024/summer/c.jpg".to_string()));
        // The cache was re-enabled on the error path.
        assert!(driver.cache().is_active());
    }

    #[tokio::test]
    async fn test_cancelled_delete_stops_with_partial_failure() {
        let token = CancellationToken::new();
        let (mock, driver) = driver_from(MockBackend::with_files(TREE), DriverConfig::new("fileadmin"));
        let driver = driver.with_cancellation(token.clone());
        token.cancel();
        let err = driver.delete_folder("/photos/", true).await.unwrap_err();
        assert!(err.progress().unwrap().deleted.is_empty());
        assert_eq!(mock.keys().await.len(), TREE.len());
        assert!(driver.cache().is_active());
    }
}
