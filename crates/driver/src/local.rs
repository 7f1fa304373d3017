//! Local copies of remote files, for tools that need a real path on disk.

use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// A file downloaded for local processing.
///
/// Writable copies are unique temporary files deleted when the value is
/// dropped, unless [`persist`](Self::persist)ed. Read-only copies live at a
/// deterministic path and are left in place for the next caller.
#[derive(Debug)]
pub struct LocalCopy {
    path: PathBuf,
    temp: Option<TempPath>,
}
impl LocalCopy {
    pub(crate) fn cached(path: PathBuf) -> Self {
        Self { path, temp: None }
    }

    pub(crate) fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Keep the file on disk after this value is dropped. Cleanup becomes
    /// the caller's job.
    pub fn persist(mut self) -> PathBuf {
        if let Some(temp) = self.temp.take() {
            if let Err(err) = temp.keep() {
                tracing::warn!(path = %self.path.display(), error = %err.error, "Could not persist local copy");
            }
        }
        std::mem::take(&mut self.path)
    }
}
impl AsRef<Path> for LocalCopy {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}
