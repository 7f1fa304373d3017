//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Backend-specific failures (SDK errors, I/O errors) are
//! classified into one of these kinds as close to the call site as possible.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Object does not exist in the bucket.
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A required setting (bucket name, credentials) was not provided.
    #[display("configuration missing: {_0}")]
    ConfigurationMissing(#[error(not(source))] String),
    /// The backend rejected the supplied credentials.
    #[display("credentials rejected by backend")]
    CredentialsInvalid,
    /// Network or service failure talking to the backend.
    #[display("backend unavailable: {_0}")]
    BackendUnavailable(#[error(not(source))] String),
    /// Key contains invalid characters or escapes the bucket root.
    #[display("invalid object key: {_0}")]
    InvalidKey(#[error(not(source))] String),
    /// Underlying I/O error (local backend, temporary files).
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
        matches!(self, Self::Io(_) | Self::BackendUnavailable(_))
    }
}
