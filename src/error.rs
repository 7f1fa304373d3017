use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open storage \"{_0}\"")]
    Storage(#[error(not(source))] String),
    #[display("target storage \"{_0}\" is not an s3 storage")]
    TargetNotS3(#[error(not(source))] String),
    #[display("no file catalog configured; set `catalog` in the configuration")]
    CatalogMissing,
    #[display("could not open the file catalog")]
    Catalog,
    #[display("storage \"{_0}\" is not reachable")]
    Unreachable(#[error(not(source))] String),
    #[display("{_0} files failed to migrate")]
    Migration(#[error(not(source))] u64),
    #[display("invalid --limit value")]
    Limit,
    #[display("could not read from the terminal")]
    Prompt,
}
