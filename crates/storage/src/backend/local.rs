//! Local filesystem storage backend.
//!
//! Presents a directory on disk as a bucket: keys are paths relative to the
//! configured root, using `/` as separator regardless of platform. Mostly
//! used as the source storage when migrating files into an object store.

use super::{BoxAsyncRead, ListStream};
use crate::error::{ErrorKind, Result};
use crate::models::{ListEntry, ObjectRecord, guess_content_type};
use crate::path::{SEPARATOR, validate_key, validate_prefix};
use crate::StorageBackend;
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    Object(ObjectRecord),
    Prefix(String),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use bucketfs_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("fileadmin", "/var/www/fileadmin")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory standing in for the bucket
    root: PathBuf,
    bucket: String,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or exists but is not a
    /// directory. A missing root directory is created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let display = root.display().to_string();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidKey(display));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidKey(display));
            }
        } else {
            // Use non-async here; it'll only happen once on initialization
            // and it's not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &display))?;
        }
        Ok(Self { name: name.into(), root, bucket: display })
    }

    /// Get the absolute path for an object key.
    fn absolute_path(&self, key: &str) -> Result<PathBuf> {
        let validated = validate_key(key)?;
        Ok(validated.split(SEPARATOR).fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    /// Convert an absolute path back to an object key.
    fn relative_key(&self, absolute: &Path) -> Result<String> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::InvalidKey(format!("path `{}` is not within root `{}`", absolute.display(), self.bucket))
        })?;
        let segments = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
            .ok_or_raise(|| ErrorKind::InvalidKey(relative.display().to_string()))?;
        validate_key(&segments.join("/"))
    }

    fn record(&self, key: &str, metadata: &Metadata) -> Result<ObjectRecord> {
        let modified: OffsetDateTime = metadata.modified().map_err(ErrorKind::Io)?.into();
        // Birth time isn't available on every filesystem.
        let created: OffsetDateTime = metadata.created().map(Into::into).unwrap_or(modified);
        Ok(ObjectRecord::new(key, &self.bucket, metadata.len(), modified)
            .with_created(created)
            .with_content_type(guess_content_type(key))
            .with_media_link(format!("file://{}/{key}", self.bucket.trim_end_matches('/'))))
    }

    fn map_io_error(e: std::io::Error, key: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(key.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::CredentialsInvalid,
            _ => ErrorKind::Io(e),
        }
    }

    async fn ensure_parent(&self, path: &Path, key: &str) -> Result<()> {
        // Create parent directories if needed, to keep behaviour
        // consistent with object stores.
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, key))?;
        }
        Ok(())
    }

    /// Keeps the stream loop free of `?`-less error juggling: classify one
    /// directory entry against the listing prefix.
    async fn process_entry(&self, entry: DirEntry, prefix: &str, delimiter: Option<char>) -> Result<WalkEntry> {
        let path = entry.path();
        let key = self.relative_key(&path)?;
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &key))?;
        if metadata.is_dir() {
            let folder = format!("{key}{SEPARATOR}");
            if folder.starts_with(prefix) {
                return Ok(match delimiter {
                    Some(_) => WalkEntry::Prefix(folder),
                    None => WalkEntry::Descend(path),
                });
            }
            // Prefix points somewhere below this directory.
            if prefix.starts_with(&folder) {
                return Ok(WalkEntry::Descend(path));
            }
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_file() && key.starts_with(prefix) {
            return Ok(WalkEntry::Object(self.record(&key, &metadata)?));
        }
        // Note: silently drop what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn media_prefix(&self) -> Option<String> {
        Some(format!("file://{}", self.bucket.trim_end_matches('/')))
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: Option<&str>) -> Result<ObjectRecord> {
        let abs_path = self.absolute_path(key)?;
        self.ensure_parent(&abs_path, key).await?;
        fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, key))?;
        let record = self.stat(key).await?;
        Ok(match content_type {
            Some(content_type) => record.with_content_type(content_type),
            None => record,
        })
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(key)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, key))?)
    }

    async fn reader(&self, key: &str) -> Result<BoxAsyncRead> {
        let abs_path = self.absolute_path(key)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, key))?;
        Ok(Box::pin(file))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<ObjectRecord> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        self.ensure_parent(&to_path, to).await?;
        fs::copy(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?;
        self.stat(to).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let abs_path = self.absolute_path(key)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, key))?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let abs_path = self.absolute_path(key)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn stat(&self, key: &str) -> Result<ObjectRecord> {
        let abs_path = self.absolute_path(key)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, key))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(key.to_string()));
        }
        self.record(&validate_key(key)?, &metadata)
    }

    fn list_stream<'a>(&'a self, prefix: &'a str, delimiter: Option<char>) -> ListStream<'a> {
        let prefix = match validate_prefix(prefix) {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        // Walk from the directory part of the prefix. So the prefix
        // "photos/20" starts in "photos" and matches "photos/2024/…" as
        // well as "photos/20.jpg", like an object store would.
        let start_dir = match prefix.rfind(SEPARATOR) {
            Some(idx) => prefix[..idx].split(SEPARATOR).fold(self.root.clone(), |path, s| path.join(s)),
            None => self.root.clone(),
        };
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Listing a prefix nothing lives under is an empty
                    // listing on an object store, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &prefix)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &prefix))); continue 'entries; },
                    };
                    match self.process_entry(entry, &prefix, delimiter).await {
                        Ok(WalkEntry::Object(record)) => yield Ok(ListEntry::Object(record)),
                        Ok(WalkEntry::Prefix(sub)) => yield Ok(ListEntry::Prefix(sub)),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| Self::map_io_error(e, &self.bucket))?;
        if metadata.permissions().readonly() {
            exn::bail!(ErrorKind::CredentialsInvalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
        assert!(LocalBackend::new("name", "./relative").is_err());
    }

    #[test]
    fn test_absolute_path() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("photos").join("image.jpg");
        assert_eq!(backend.absolute_path("photos/image.jpg").unwrap(), expected);
        // Path traversal is prevented
        assert!(backend.absolute_path("../etc/passwd").is_err());
    }

    #[test]
    fn test_relative_key() {
        let (temp_dir, backend) = backend();
        let abs = temp_dir.path().join("photos").join("image.jpg");
        assert_eq!(backend.relative_key(&abs).unwrap(), "photos/image.jpg");
        assert!(backend.relative_key(Path::new("/other/file.html")).is_err());
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let (_temp_dir, backend) = backend();
        let record = backend.upload("a/b/c/test.txt", b"Hello, world!", None).await.unwrap();
        assert_eq!(record.key, "a/b/c/test.txt");
        assert_eq!(record.size, 13);
        assert_eq!(record.content_type.as_deref(), Some("text/plain"));
        assert_eq!(backend.download("a/b/c/test.txt").await.unwrap(), b"Hello, world!");
    }

    #[tokio::test]
    async fn test_reader() {
        let (_temp_dir, backend) = backend();
        backend.upload("file.bin", b"0123456789", None).await.unwrap();
        let mut reader = backend.reader("file.bin").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"0123456789");
    }

    #[tokio::test]
    async fn test_copy_creates_directories() {
        let (_temp_dir, backend) = backend();
        backend.upload("file.txt", b"data", None).await.unwrap();
        let record = backend.copy("file.txt", "x/y/file.txt").await.unwrap();
        assert_eq!(record.key, "x/y/file.txt");
        assert!(backend.exists("file.txt").await.unwrap());
        assert!(backend.exists("x/y/file.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_temp_dir, backend) = backend();
        backend.upload("file.txt", b"data", None).await.unwrap();
        backend.delete("file.txt").await.unwrap();
        assert!(!backend.exists("file.txt").await.unwrap());
        let err = backend.delete("file.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat_directory_is_not_found() {
        let (_temp_dir, backend) = backend();
        backend.upload("dir/file.txt", b"data", None).await.unwrap();
        let err = backend.stat("dir").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let (_temp_dir, backend) = backend();
        backend.upload("photos/a.jpg", b"a", None).await.unwrap();
        backend.upload("photos/2024/b.jpg", b"b", None).await.unwrap();
        backend.upload("photos-archive/c.jpg", b"c", None).await.unwrap();
        let listing = backend.list("photos/", Some('/')).await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["photos/a.jpg"]);
        assert_eq!(listing.prefixes, vec!["photos/2024/".to_string()]);
    }

    #[tokio::test]
    async fn test_list_recursive() {
        let (_temp_dir, backend) = backend();
        backend.upload("photos/a.jpg", b"a", None).await.unwrap();
        backend.upload("photos/2024/b.jpg", b"b", None).await.unwrap();
        backend.upload("other/c.jpg", b"c", None).await.unwrap();
        let mut keys: Vec<_> = backend.list("photos/", None).await.unwrap().objects.into_iter().map(|r| r.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["photos/2024/b.jpg".to_string(), "photos/a.jpg".to_string()]);
        assert_eq!(backend.list("", None).await.unwrap().objects.len(), 3);
    }

    #[tokio::test]
    async fn test_list_nonexistent_prefix() {
        let (_temp_dir, backend) = backend();
        let listing = backend.list("nonexistent/", Some('/')).await.unwrap();
        assert!(listing.objects.is_empty());
        assert!(listing.prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_key_security() {
        let (_temp_dir, backend) = backend();
        assert!(backend.download("../etc/passwd").await.is_err());
        assert!(backend.download("etc/../../passwd").await.is_err());
        assert!(backend.upload("../etc/passwd", b"data", None).await.is_err());
        assert!(backend.delete("../../file").await.is_err());
    }

    #[tokio::test]
    async fn test_ping() {
        let (_temp_dir, backend) = backend();
        backend.ping().await.unwrap();
    }
}
