//! Storage models.
//!
//! These types are what backends hand back from list/stat/upload calls.
//! [`ObjectRecord`] is also the value stored in listing cache entries, hence
//! the serde derives.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Backend metadata snapshot for one object.
///
/// Transient: held inside cache entries or short-lived call results, never
/// treated as the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object key, relative to the bucket (and backend prefix, if any).
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Content type reported by the backend, if any.
    pub content_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
    /// Bucket the object lives in.
    pub bucket: String,
    /// Media/download link, used to derive public URLs. Listings from some
    /// backends omit it, in which case a `stat` fills it in.
    pub media_link: Option<String>,
}
impl ObjectRecord {
    /// Create a record with matching created/updated timestamps and no
    /// content type or media link.
    pub fn new(key: impl Into<String>, bucket: impl Into<String>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            key: key.into(),
            size,
            content_type: None,
            created: modified,
            updated: modified,
            bucket: bucket.into(),
            media_link: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_created(mut self, created: OffsetDateTime) -> Self {
        self.created = created;
        self
    }

    pub fn with_media_link(mut self, media_link: impl Into<String>) -> Self {
        self.media_link = Some(media_link.into());
        self
    }
}

/// One item of a prefix/delimiter listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// An object directly under the prefix (or anywhere under it, when no
    /// delimiter was given).
    Object(ObjectRecord),
    /// A "virtual sub-folder" one level deeper, including its trailing
    /// delimiter (`photos/2024/`).
    Prefix(String),
}

/// Collected result of a prefix/delimiter listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub objects: Vec<ObjectRecord>,
    pub prefixes: Vec<String>,
}
impl Extend<ListEntry> for Listing {
    fn extend<T: IntoIterator<Item = ListEntry>>(&mut self, iter: T) {
        for entry in iter {
            match entry {
                ListEntry::Object(record) => self.objects.push(record),
                ListEntry::Prefix(prefix) => self.prefixes.push(prefix),
            }
        }
    }
}

/// Guess a content type from the key's extension.
pub fn guess_content_type(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().essence_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case("photos/image.jpg", "image/jpeg")]
    #[case("docs/readme.txt", "text/plain")]
    #[case("archive.tar.unknownext", "application/octet-stream")]
    #[case("no-extension", "application/octet-stream")]
    fn test_guess_content_type(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(guess_content_type(key), expected);
    }

    #[test]
    fn test_listing_extend_splits_entries() {
        let record = ObjectRecord::new("a/b.txt", "bucket", 3, datetime!(2024-01-01 00:00 UTC));
        let mut listing = Listing::default();
        listing.extend([ListEntry::Object(record.clone()), ListEntry::Prefix("a/c/".to_string())]);
        assert_eq!(listing.objects, vec![record]);
        assert_eq!(listing.prefixes, vec!["a/c/".to_string()]);
    }

    #[test]
    fn test_record_serializes_timestamps_as_rfc3339() {
        let record = ObjectRecord::new("a.txt", "bucket", 1, datetime!(2024-03-05 10:20:30 UTC))
            .with_content_type("text/plain")
            .with_media_link("https://storage.cloud.google.com/bucket/a.txt");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"updated\":\"2024-03-05T10:20:30Z\""));
        let back: ObjectRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
