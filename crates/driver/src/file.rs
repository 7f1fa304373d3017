//! File operations.
//!
//! Every mutation flushes the `file` cache tag *before* calling the backend,
//! so no reader is served a listing from before the upload started.

use crate::driver::Driver;
use crate::error::{ErrorKind, Result};
use crate::info::hash_identifier;
use crate::local::LocalCopy;
use crate::sanitize::sanitize_file_name;
use crate::url::public_url;
use bucketfs_cache::Tags;
use bucketfs_storage::path::{
    SEPARATOR, basename, combine_folder_and_file, compute_file_identifier, parent_folder, validate_key,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::instrument;

impl Driver {
    /// Upload `data` as `name` inside `folder`. The name is sanitized first.
    ///
    /// Returns the new file's identifier.
    pub async fn add_file(&self, data: &[u8], folder: &str, name: &str) -> Result<String> {
        let name = sanitize_file_name(name)?;
        self.upload_key(&combine_folder_and_file(folder, &name), data).await
    }

    /// Upload the file at `path` into `folder`, under `new_name` or the
    /// file's own name, optionally deleting the local file afterwards.
    pub async fn add_local_file(
        &self,
        path: &Path,
        folder: &str,
        new_name: Option<&str>,
        remove_original: bool,
    ) -> Result<String> {
        let name = match new_name {
            Some(name) => name.to_string(),
            None => match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_string(),
                None => exn::bail!(ErrorKind::InvalidFileName(path.display().to_string())),
            },
        };
        let data = tokio::fs::read(path).await.map_err(ErrorKind::Io)?;
        let identifier = self.add_file(&data, folder, &name).await?;
        if remove_original {
            tokio::fs::remove_file(path).await.map_err(ErrorKind::Io)?;
        }
        Ok(identifier)
    }

    /// Upload `data` at exactly `identifier`, without sanitizing the name.
    pub async fn upload_file(&self, identifier: &str, data: &[u8]) -> Result<String> {
        let key = Self::file_key(identifier)?;
        self.upload_key(&key, data).await
    }

    /// Overwrite an existing file with the contents of a local file.
    pub async fn replace_file_contents(&self, identifier: &str, local_path: &Path) -> Result<()> {
        let key = Self::file_key(identifier)?;
        let data = tokio::fs::read(local_path).await.map_err(ErrorKind::Io)?;
        self.upload_key(&key, &data).await?;
        Ok(())
    }

    /// Not supported: contents are only ever replaced from a local file.
    pub async fn set_file_contents(&self, _identifier: &str, _contents: &[u8]) -> Result<usize> {
        exn::bail!(ErrorKind::NotImplemented("set_file_contents"))
    }

    /// Not supported: files are created by uploading content.
    pub async fn create_file(&self, _name: &str, _folder: &str) -> Result<String> {
        exn::bail!(ErrorKind::NotImplemented("create_file"))
    }

    /// A single object can create or empty a prefix, so every object
    /// mutation drops the folder listings along with the file listings.
    async fn invalidate_listings(&self) {
        self.cache.flush_tags(Tags::ALL).await;
    }

    async fn upload_key(&self, key: &str, data: &[u8]) -> Result<String> {
        let key = validate_key(key).map_err(ErrorKind::storage)?;
        self.invalidate_listings().await;
        tracing::info!(storage = %self.scope(), key = %key, bytes = data.len(), "Uploading object");
        let record = self.backend.upload(&key, data, None).await.map_err(ErrorKind::storage)?;
        tracing::info!(storage = %self.scope(), key = %record.key, "Uploaded object");
        Ok(compute_file_identifier(&record.key))
    }

    /// Delete a file. Backend errors (including a missing object) propagate.
    pub async fn delete_file(&self, identifier: &str) -> Result<()> {
        let key = Self::file_key(identifier)?;
        self.invalidate_listings().await;
        tracing::info!(storage = %self.scope(), key = %key, "Deleting object");
        self.backend.delete(&key).await.map_err(ErrorKind::storage)?;
        tracing::info!(storage = %self.scope(), key = %key, "Deleted object");
        Ok(())
    }

    /// Copy a file into `target_folder` as `name`. Returns the copy's identifier.
    pub async fn copy_file_within_storage(&self, identifier: &str, target_folder: &str, name: &str) -> Result<String> {
        let from = Self::file_key(identifier)?;
        let to = combine_folder_and_file(target_folder, name);
        self.invalidate_listings().await;
        tracing::info!(storage = %self.scope(), from = %from, to = %to, "Copying object");
        let record = self.backend.copy(&from, &to).await.map_err(ErrorKind::storage)?;
        tracing::info!(storage = %self.scope(), from = %from, to = %record.key, "Copied object");
        Ok(compute_file_identifier(&record.key))
    }

    /// Move a file into `target_folder` as `name`. Returns the new identifier.
    pub async fn move_file_within_storage(&self, identifier: &str, target_folder: &str, name: &str) -> Result<String> {
        let from = Self::file_key(identifier)?;
        self.move_key(&from, &combine_folder_and_file(target_folder, name)).await
    }

    /// Rename a file.
    ///
    /// A bare name (no separators) is sanitized and keeps the file in its
    /// current folder; anything else is taken as the full target identifier.
    pub async fn rename_file(&self, identifier: &str, new_name: &str) -> Result<String> {
        let from = Self::file_key(identifier)?;
        let to = match new_name.contains(SEPARATOR) {
            false => combine_folder_and_file(&parent_folder(&from), &sanitize_file_name(new_name)?),
            true => Self::file_key(new_name)?,
        };
        self.move_key(&from, &to).await
    }

    /// Copy then delete the source.
    async fn move_key(&self, from: &str, to: &str) -> Result<String> {
        let to = validate_key(to).map_err(ErrorKind::storage)?;
        if from == to {
            return Ok(compute_file_identifier(from));
        }
        self.invalidate_listings().await;
        tracing::info!(storage = %self.scope(), from, to = %to, "Moving object");
        self.backend.copy(from, &to).await.map_err(ErrorKind::storage)?;
        self.backend.delete(from).await.map_err(ErrorKind::storage)?;
        tracing::info!(storage = %self.scope(), from, to = %to, "Moved object");
        Ok(compute_file_identifier(&to))
    }

    /// Whole file contents in memory. Prefer [`dump_file_contents`](Self::dump_file_contents)
    /// for anything large.
    pub async fn get_file_contents(&self, identifier: &str) -> Result<Vec<u8>> {
        let key = Self::file_key(identifier)?;
        self.backend.download(&key).await.map_err(ErrorKind::storage)
    }

    /// Stream a file into `writer`, returning the number of bytes written.
    pub async fn dump_file_contents<W>(&self, identifier: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let key = Self::file_key(identifier)?;
        let mut reader = self.backend.reader(&key).await.map_err(ErrorKind::storage)?;
        let written = tokio::io::copy(&mut reader, writer).await.map_err(ErrorKind::Io)?;
        writer.flush().await.map_err(ErrorKind::Io)?;
        Ok(written)
    }

    pub async fn get_public_url(&self, identifier: &str) -> Result<String> {
        let mut record = self.object_record(identifier).await?;
        if record.media_link.is_none() {
            record = self.backend.stat(&record.key).await.map_err(ErrorKind::storage)?;
        }
        let Some(link) = record.media_link.as_deref() else {
            exn::bail!(ErrorKind::BackendUnavailable(format!("no media link for {identifier}")));
        };
        let media_prefix = self.backend.media_prefix();
        Ok(public_url(link, &record.bucket, media_prefix.as_deref(), self.config.base_uri.as_deref()))
    }

    /// Download a file for local processing.
    ///
    /// Writable copies are fresh temporary files, removed when the returned
    /// [`LocalCopy`] is dropped. Read-only copies are kept at a path derived
    /// from the identifier and reused while they exist with a nonzero size.
    #[instrument(skip(self), fields(storage = %self.scope()))]
    pub async fn get_local_copy(&self, identifier: &str, writable: bool) -> Result<LocalCopy> {
        let key = Self::file_key(identifier)?;
        let suffix = match Path::new(basename(&key)).extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!(".{ext}"),
            None => String::new(),
        };

        if writable {
            tokio::fs::create_dir_all(&self.config.local_dir).await.map_err(ErrorKind::Io)?;
            let temp = tempfile::Builder::new()
                .prefix("bucketfs-")
                .suffix(&suffix)
                .tempfile_in(&self.config.local_dir)
                .map_err(ErrorKind::Io)?
                .into_temp_path();
            // Dropping `temp` on error removes the partial download.
            self.download_to(&key, &temp).await?;
            return Ok(LocalCopy::temporary(temp));
        }

        let path = self.cached_copy_path(&key, &suffix);
        if let Ok(metadata) = tokio::fs::metadata(&path).await
            && metadata.len() > 0
        {
            tracing::debug!(key = %key, path = %path.display(), "Reusing local copy");
            return Ok(LocalCopy::cached(path));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        if let Err(err) = self.download_to(&key, &path).await {
            _ = tokio::fs::remove_file(&path).await;
            return Err(err);
        }
        Ok(LocalCopy::cached(path))
    }

    fn cached_copy_path(&self, key: &str, suffix: &str) -> PathBuf {
        let digest = hash_identifier(&compute_file_identifier(key));
        self.config.local_dir.join(self.scope()).join(format!("{}{suffix}", &digest[..32]))
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<u64> {
        tracing::info!(storage = %self.scope(), key, path = %path.display(), "Downloading for local processing");
        let mut reader = self.backend.reader(key).await.map_err(ErrorKind::storage)?;
        let mut file = tokio::fs::File::create(path).await.map_err(ErrorKind::Io)?;
        let written = tokio::io::copy(&mut reader, &mut file).await.map_err(ErrorKind::Io)?;
        file.flush().await.map_err(ErrorKind::Io)?;
        Ok(written)
    }
}
