//! Cache entry stores.
//!
//! A store is a dumb tagged key/value map with expiry. It has no idea what
//! the values mean; [`ListingCache`](crate::ListingCache) owns key derivation,
//! serialization and the enable/disable switch.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub type StoreHandle = Arc<dyn CacheStore + Send + Sync>;

/// Label grouping cache entries for bulk invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Entries holding a folder's file records.
    File,
    /// Entries holding a folder's sub-folder identifiers.
    Folder,
}
impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

/// A set of [`Tag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tags(u8);
impl Tags {
    pub const NONE: Self = Self(0);
    pub const FILE: Self = Self(1);
    pub const FOLDER: Self = Self(2);
    pub const ALL: Self = Self(3);

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub(crate) fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, tag: Tag) -> bool {
        let bit = match tag {
            Tag::File => Self::FILE.0,
            Tag::Folder => Self::FOLDER.0,
        };
        self.0 & bit != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
impl BitOr for Tags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
impl From<Tag> for Tags {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::File => Self::FILE,
            Tag::Folder => Self::FOLDER,
        }
    }
}

/// Backing storage for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live (non-expired) entry.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store an entry under `tag`, replacing any existing entry wholesale.
    async fn set(&self, key: &str, value: String, tag: Tag, lifetime: Duration) -> Result<()>;

    /// Remove every entry carrying `tag`.
    async fn flush_tag(&self, tag: Tag) -> Result<()>;

    /// Remove every entry.
    async fn flush(&self) -> Result<()>;
}

struct MemoryEntry {
    tag: Tag,
    value: String,
    expires_at: Instant,
}

/// Process-local cache store.
///
/// Entries live in a `HashMap` behind a [`RwLock`]; expired entries are
/// ignored on read and swept on write.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.entries.read().await;
        Ok(guard.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, tag: Tag, lifetime: Duration) -> Result<()> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        guard.retain(|_, e| e.expires_at > now);
        guard.insert(
            key.to_string(),
            MemoryEntry {
                tag,
                value,
                expires_at: now + lifetime,
            },
        );
        Ok(())
    }

    async fn flush_tag(&self, tag: Tag) -> Result<()> {
        self.entries.write().await.retain(|_, e| e.tag != tag);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
