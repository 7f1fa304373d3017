//! Migration Error Types
//!
//! Per-file failures are yielded from the [`migrate`](crate::migrate) stream
//! without ending it; only catalog connection problems and an unparsable
//! selection stop a job before it starts.

use derive_more::{Display, Error};

/// A migration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading or updating the file catalog failed.
    #[display("file catalog error")]
    Catalog,
    /// Reading from the source storage failed.
    #[display("could not read from source storage")]
    Source,
    /// Writing to the target storage failed. The source file is untouched.
    #[display("could not write to target storage")]
    Target,
    /// The database opened as the catalog has no `files` table.
    #[display("database has no files table")]
    NotACatalog,
    #[display("could not write the missing files log")]
    MissingLog,
    /// `--limit` style selection that is not `limit` or `offset,limit`.
    #[display("invalid selection: {_0}")]
    InvalidSelection(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Catalog | Self::Source | Self::Target)
    }
}
