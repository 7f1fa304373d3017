//! A folder-and-file view over a flat object store.
//!
//! Object stores have no directories, only keys. The [`Driver`] presents a
//! hierarchical file system on top of one storage scope: identifiers look
//! like paths (`/photos/2024/beach.jpg`), folders are key prefixes that are
//! materialized with a zero-byte `.keep` marker object, and listings are
//! memoized in a [`ListingCache`](bucketfs_cache::ListingCache) that every
//! mutating operation invalidates.
//!
//! Recursive folder operations are not atomic. When one stops part way, the
//! error is an [`ErrorKind::PartialFailure`](crate::error::ErrorKind) whose
//! [`Progress`] lists what was already done.

mod driver;
pub mod error;
mod file;
mod folder;
mod info;
mod listing;
mod local;
mod sanitize;
#[cfg(test)]
mod testing;
mod url;

pub use crate::driver::{Driver, DriverConfig};
pub use crate::error::{IdentifierMap, Progress};
pub use crate::info::{FileInfo, FolderInfo, Permissions, hash_identifier};
pub use crate::listing::{ListOptions, SortField};
pub use crate::local::LocalCopy;
pub use crate::sanitize::sanitize_file_name;
pub use crate::url::{GCS_BASE_URL, GCS_DOWNLOAD_URL, public_url};
