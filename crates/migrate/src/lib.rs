//! Bulk migration of catalogued files between storage scopes.
//!
//! The host keeps a [`Catalog`] of every file and the storage scope holding
//! it. A migration selects rows of one scope (include/exclude patterns and an
//! `offset,limit` window) and streams them through [`migrate`], either
//! copying each file to the target scope or moving it there and re-pointing
//! its catalog row. Catalogued files absent from the source are reported and
//! written to a log for the operator to follow up on.

mod catalog;
pub mod error;
mod missing;
mod stream;

pub use crate::catalog::{Catalog, CatalogFile, Selection, Window};
pub use crate::stream::{MigrateEvent, MigrateOptions, Mode, Summary, migrate};
