use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configuration source could not be read or did not match the
    /// expected shape.
    #[display("could not load configuration")]
    Load,
    /// A setting required by the named storage is absent or empty.
    #[display("storage \"{_0}\" is missing required setting \"{_1}\"")]
    ConfigurationMissing(#[error(not(source))] String, #[error(not(source))] String),
    #[display("no storage named \"{_0}\" is configured")]
    UnknownStorage(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Configuration problems need an operator to fix a file or environment
    /// variable first.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
