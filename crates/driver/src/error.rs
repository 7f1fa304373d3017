//! Driver Error Types
//!
//! Storage errors are re-raised into these kinds so the caller can branch on
//! what to do next without knowing which backend produced them. Cache errors
//! never get here.

use bucketfs_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use bucketfs_storage::path::compute_file_identifier;
use derive_more::{Display, Error};
use std::collections::BTreeMap;
use std::io::Error as IoError;

/// A driver error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Old identifier → new identifier, for every file a folder copy or move
/// touched.
pub type IdentifierMap = BTreeMap<String, String>;

/// Work completed by a recursive operation before it stopped.
///
/// Recursive operations are not atomic: objects already copied or deleted
/// stay that way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub mapped: IdentifierMap,
    pub deleted: Vec<String>,
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A required setting (bucket name, credentials) was not provided.
    #[display("configuration missing: {_0}")]
    ConfigurationMissing(#[error(not(source))] String),
    #[display("credentials rejected by backend")]
    CredentialsInvalid,
    #[display("backend unavailable: {_0}")]
    BackendUnavailable(#[error(not(source))] String),
    /// File or folder does not exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Sanitizing the name left nothing usable.
    #[display("invalid file name: {_0:?}")]
    InvalidFileName(#[error(not(source))] String),
    /// Identifier escapes the storage root or targets itself.
    #[display("invalid identifier: {_0}")]
    InvalidIdentifier(#[error(not(source))] String),
    /// Non-recursive delete of a folder that still has children.
    #[display("folder not empty: {_0}")]
    FolderNotEmpty(#[error(not(source))] String),
    #[display("operation not implemented: {_0}")]
    NotImplemented(#[error(not(source))] &'static str),
    /// The driver's cancellation token fired.
    #[display("operation cancelled")]
    Cancelled,
    /// A recursive operation stopped partway. The cause is the child error.
    #[display(
        "operation stopped after mapping {} and deleting {} objects",
        _0.mapped.len(),
        _0.deleted.len()
    )]
    PartialFailure(#[error(not(source))] Progress),
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Io(_))
    }

    /// Re-raise a storage error as the matching driver kind, keeping the
    /// storage error as the cause.
    #[track_caller]
    pub fn storage(err: StorageError) -> Error {
        let kind = match &*err {
            StorageErrorKind::NotFound(key) => Self::NotFound(compute_file_identifier(key)),
            StorageErrorKind::ConfigurationMissing(setting) => Self::ConfigurationMissing(setting.clone()),
            StorageErrorKind::CredentialsInvalid => Self::CredentialsInvalid,
            StorageErrorKind::BackendUnavailable(message) => Self::BackendUnavailable(message.clone()),
            StorageErrorKind::InvalidKey(key) => Self::InvalidIdentifier(key.clone()),
            StorageErrorKind::Io(io) => Self::Io(IoError::new(io.kind(), io.to_string())),
        };
        err.raise(kind)
    }

    /// Progress carried by a [`PartialFailure`](Self::PartialFailure).
    pub fn progress(&self) -> Option<&Progress> {
        match self {
            Self::PartialFailure(progress) => Some(progress),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StorageErrorKind::NotFound("photos/a.jpg".into()), "not found: /photos/a.jpg")]
    #[case(StorageErrorKind::CredentialsInvalid, "credentials rejected by backend")]
    #[case(StorageErrorKind::InvalidKey("../x".into()), "invalid identifier: ../x")]
    #[case(StorageErrorKind::ConfigurationMissing("bucket".into()), "configuration missing: bucket")]
    fn test_storage_errors_are_reraised(#[case] kind: StorageErrorKind, #[case] expected: &str) {
        let err = ErrorKind::storage(exn::Exn::from(kind));
        assert_eq!((*err).to_string(), expected);
    }

    #[rstest]
    #[case(ErrorKind::BackendUnavailable("timeout".into()), true)]
    #[case(ErrorKind::Io(IoError::other("disk")), true)]
    #[case(ErrorKind::NotFound("/a".into()), false)]
    #[case(ErrorKind::Cancelled, false)]
    #[case(ErrorKind::PartialFailure(Progress::default()), false)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_partial_failure_display() {
        let mut progress = Progress::default();
        progress.mapped.insert("/a/x.jpg".into(), "/b/x.jpg".into());
        let kind = ErrorKind::PartialFailure(progress);
        assert_eq!(kind.to_string(), "operation stopped after mapping 1 and deleting 0 objects");
        assert_eq!(kind.progress().map(|p| p.mapped.len()), Some(1));
    }
}
