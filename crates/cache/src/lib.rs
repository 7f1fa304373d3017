//! Read-through listing cache.
//!
//! This crate shields the object store from repetitive listing calls. It is
//! never the source of truth: every entry can be dropped at any moment and
//! rebuilt from a backend listing.
//!
//! # Architecture
//! - [`CacheStore`]: where entries physically live. [`MemoryStore`] for a
//!   single process, [`SqliteStore`] to share entries between invocations.
//! - [`ListingCache`]: the typed front the driver talks to. Derives keys,
//!   (de)serializes values, owns the enable/disable switch and the
//!   [`Suppression`] guard used around recursive operations.

mod db;
pub mod error;
mod listing;
mod store;

pub use crate::db::SqliteStore;
pub use crate::listing::{DEFAULT_LIFETIME, EntryKind, ListingCache, Suppression};
pub use crate::store::{CacheStore, MemoryStore, StoreHandle, Tag, Tags};
