//! Object-store backends and the identifier/key codec.
//!
//! The [`StorageBackend`] trait is the only place remote I/O happens; the
//! [`path`] module is the only place identifiers are turned into keys.

pub mod backend;
pub mod error;
mod models;
pub mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::{ListEntry, Listing, ObjectRecord, guess_content_type};
pub use crate::path::validate_key;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
