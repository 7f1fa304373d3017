//! Metadata views handed to the host.

use bucketfs_storage::ObjectRecord;
use bucketfs_storage::guess_content_type;
use bucketfs_storage::path::{basename, canonical_folder, compute_file_identifier, parent_folder};
use time::OffsetDateTime;

/// BLAKE3 hex digest of an identifier.
pub fn hash_identifier(identifier: &str) -> String {
    blake3::hash(identifier.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub identifier: String,
    pub name: String,
    /// Text after the last `.` of the name; empty when there is none.
    pub extension: String,
    pub size: u64,
    pub mime_type: String,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
    /// Storage scope the file belongs to.
    pub storage: String,
    pub identifier_hash: String,
    pub folder_hash: String,
}
impl FileInfo {
    pub fn from_record(record: &ObjectRecord, storage: &str) -> Self {
        let identifier = compute_file_identifier(&record.key);
        let name = basename(&identifier).to_string();
        let extension = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
            _ => String::new(),
        };
        Self {
            mime_type: record.content_type.clone().unwrap_or_else(|| guess_content_type(&record.key)),
            folder_hash: hash_identifier(&parent_folder(&identifier)),
            identifier_hash: hash_identifier(&identifier),
            size: record.size,
            created: record.created,
            modified: record.updated,
            storage: storage.to_string(),
            identifier,
            name,
            extension,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub identifier: String,
    pub name: String,
    pub storage: String,
}
impl FolderInfo {
    pub fn new(identifier: &str, storage: &str) -> Self {
        let identifier = canonical_folder(identifier);
        Self {
            name: basename(&identifier).to_string(),
            identifier,
            storage: storage.to_string(),
        }
    }
}

/// Access rights on a file or folder. The object store has no per-object
/// ACL in this model, so both are always granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}
impl Default for Permissions {
    fn default() -> Self {
        Self { read: true, write: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case("photos/2024/image.jpg", "image.jpg", "jpg", "image/jpeg")]
    #[case("README", "README", "", "application/octet-stream")]
    #[case(".htaccess", ".htaccess", "", "application/octet-stream")]
    #[case("notes/todo.txt", "todo.txt", "txt", "text/plain")]
    fn test_file_info_from_record(
        #[case] key: &str,
        #[case] name: &str,
        #[case] extension: &str,
        #[case] mime_type: &str,
    ) {
        let record = ObjectRecord::new(key, "media", 42, datetime!(2024-05-01 12:00 UTC));
        let info = FileInfo::from_record(&record, "fileadmin");
        assert_eq!(info.identifier, format!("/{key}"));
        assert_eq!(info.name, name);
        assert_eq!(info.extension, extension);
        assert_eq!(info.mime_type, mime_type);
        assert_eq!(info.size, 42);
        assert_eq!(info.storage, "fileadmin");
        assert_eq!(info.identifier_hash, hash_identifier(&info.identifier));
    }

    #[test]
    fn test_reported_content_type_wins() {
        let record = ObjectRecord::new("photos/image.jpg", "media", 1, datetime!(2024-05-01 12:00 UTC))
            .with_content_type("image/webp");
        assert_eq!(FileInfo::from_record(&record, "fileadmin").mime_type, "image/webp");
    }

    #[test]
    fn test_folder_hash_is_parent_identifier_hash() {
        let record = ObjectRecord::new("photos/image.jpg", "media", 1, datetime!(2024-05-01 12:00 UTC));
        let info = FileInfo::from_record(&record, "fileadmin");
        assert_eq!(info.folder_hash, hash_identifier("/photos/"));
    }

    #[rstest]
    #[case("/photos/2024/", "/photos/2024/", "2024")]
    #[case("photos", "/photos/", "photos")]
    #[case("/", "/", "")]
    fn test_folder_info(#[case] input: &str, #[case] identifier: &str, #[case] name: &str) {
        let info = FolderInfo::new(input, "fileadmin");
        assert_eq!(info.identifier, identifier);
        assert_eq!(info.name, name);
    }
}
