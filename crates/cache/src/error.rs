//! Cache Error Types
//!
//! These only ever surface from the entry stores themselves. The
//! [`ListingCache`](crate::ListingCache) front logs them and degrades to a
//! cache miss, so driver callers never see a cache error.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("cache database error")]
    Database,
    #[display("cache database migration error")]
    Migration,
    /// Serialization/deserialization error.
    #[display("invalid cache data")]
    InvalidData,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
