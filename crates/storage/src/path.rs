//! Identifier/key codec and key validation.
//!
//! The host addresses everything through slash-separated identifiers rooted
//! at `/` (`/photos/image.jpg` for files, `/photos/` for folders). The object
//! store only knows flat keys (`photos/image.jpg`) and key prefixes
//! (`photos/`). Folders do not exist in the store at all: a folder is made
//! visible by a zero-byte marker object at `<prefix>.keep`.
//!
//! Every conversion between the two worlds goes through this module so that
//! no caller hand-rolls string splicing.

use crate::error::{ErrorKind, Result};

/// Identifier of the root folder.
pub const ROOT: &str = "/";
/// Separator between identifier segments and key segments alike.
pub const SEPARATOR: char = '/';
/// Base name of the zero-byte object that makes a folder prefix "exist".
pub const MARKER: &str = ".keep";

/// Strip leading and trailing separators, turning an identifier into a key.
///
/// ```
/// use bucketfs_storage::path::normalize;
/// assert_eq!(normalize("/photos/image.jpg"), "photos/image.jpg");
/// assert_eq!(normalize("/photos/"), "photos");
/// assert_eq!(normalize("/"), "");
/// ```
pub fn normalize(identifier: &str) -> String {
    identifier.trim_matches(SEPARATOR).to_string()
}

/// Strip separators and append exactly one trailing separator.
///
/// The root (or an empty string) normalizes to `/`; use [`folder_prefix`]
/// when a listing prefix is needed instead.
pub fn normalize_folder(identifier: &str) -> String {
    format!("{}{SEPARATOR}", normalize(identifier))
}

/// The key prefix under which a folder's children live. Empty for the root.
pub fn folder_prefix(folder: &str) -> String {
    match normalize(folder) {
        trimmed if trimmed.is_empty() => String::new(),
        trimmed => format!("{trimmed}{SEPARATOR}"),
    }
}

/// Ensure exactly one leading separator, turning a key into a file identifier.
pub fn compute_file_identifier(key: &str) -> String {
    format!("{SEPARATOR}{}", key.trim_start_matches(SEPARATOR))
}

/// Key of `filename` inside `folder`.
///
/// Only the base name of `filename` is used: any directory components in it
/// are discarded, so a name like `../../etc/passwd` cannot climb out of
/// `folder`.
pub fn combine_folder_and_file(folder: &str, filename: &str) -> String {
    normalize(&format!("{}{}", folder_prefix(folder), basename(filename)))
}

/// Identifier of the sub-folder `name` inside `folder`, in canonical folder
/// form (leading and trailing separator).
pub fn combine_folder_and_folder_name(folder: &str, name: &str) -> String {
    canonical_folder(&format!("{}{}", folder_prefix(folder), normalize(name)))
}

/// Key of the marker object for `folder`.
pub fn final_folder_identifier(folder: &str) -> String {
    combine_folder_and_file(folder, MARKER)
}

/// Canonical folder identifier: `/` for the root, otherwise `/a/b/`.
pub fn canonical_folder(identifier: &str) -> String {
    match normalize(identifier) {
        trimmed if trimmed.is_empty() => ROOT.to_string(),
        trimmed => format!("{SEPARATOR}{trimmed}{SEPARATOR}"),
    }
}

/// Canonical file identifier: leading separator, never a trailing one.
pub fn canonical_file(identifier: &str) -> String {
    compute_file_identifier(&normalize(identifier))
}

/// Last segment of an identifier or key, ignoring trailing separators.
pub fn basename(identifier: &str) -> &str {
    let trimmed = identifier.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Canonical identifier of the folder containing `identifier`.
///
/// Works for both file identifiers (`/a/b.txt` → `/a/`) and folder
/// identifiers (`/a/b/` → `/a/`). The parent of the root is the root.
pub fn parent_folder(identifier: &str) -> String {
    let trimmed = normalize(identifier);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => canonical_folder(&trimmed[..idx]),
        None => ROOT.to_string(),
    }
}

/// Whether a key (or identifier) names a folder marker object.
pub fn is_marker(key: &str) -> bool {
    !key.ends_with(SEPARATOR) && basename(key) == MARKER
}

/// Whether `candidate` lies inside `container` (or is `container` itself).
///
/// Prefix comparison is done on canonical folder form, so `/photos/` does
/// not contain `/photos-archive/x.jpg`.
pub fn is_within(container: &str, candidate: &str) -> bool {
    let container = canonical_folder(container);
    if container == ROOT {
        return true;
    }
    let candidate = compute_file_identifier(candidate);
    candidate == container || candidate == container.trim_end_matches(SEPARATOR) || candidate.starts_with(&container)
}

/// Validates an object key for safety and correctness.
///
/// Ensures that keys don't escape the bucket root (no `..` traversal) and
/// contain no NUL bytes. Empty segments and `.` segments are collapsed.
///
/// # Returns
/// Returns the normalized key if valid, or
/// [`InvalidKey`](crate::error::ErrorKind::InvalidKey) if invalid.
///
/// # Examples
///
/// ```
/// use bucketfs_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("photos/image.jpg").is_ok());
/// assert!(validate_key("a/../file.txt").is_ok()); // (never leaves bucket root)
/// // Invalid keys
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/../../b").is_err());
/// assert!(validate_key("a\0b").is_err());
/// // Keys get resolved
/// assert_eq!(validate_key("/wrong/../correct//./image.jpg").unwrap(), "correct/image.jpg");
/// ```
pub fn validate_key(key: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in key.split(SEPARATOR) {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidKey(key.to_string()));
                }
            },
            // NUL bytes truncate keys in C-based tooling on the other end.
            s if s.contains('\0') => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
            s => segments.push(s),
        }
    }
    match segments.is_empty() {
        true => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
        false => Ok(segments.join("/")),
    }
}

/// Validates a listing prefix. The empty prefix (whole bucket) is allowed;
/// a trailing separator is preserved.
pub fn validate_prefix(prefix: &str) -> Result<String> {
    if normalize(prefix).is_empty() {
        return Ok(String::new());
    }
    let validated = validate_key(prefix)?;
    Ok(match prefix.ends_with(SEPARATOR) {
        true => format!("{validated}{SEPARATOR}"),
        false => validated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/photos/image.jpg", "photos/image.jpg")]
    #[case("photos/", "photos")]
    #[case("//a/b//", "a/b")]
    #[case("/", "")]
    #[case("", "")]
    fn test_normalize(#[case] identifier: &str, #[case] expected: &str) {
        assert_eq!(normalize(identifier), expected);
    }

    #[rstest]
    #[case("/photos", "photos/")]
    #[case("/photos/", "photos/")]
    #[case("a/b", "a/b/")]
    #[case("/", "/")]
    #[case("", "/")]
    fn test_normalize_folder(#[case] identifier: &str, #[case] expected: &str) {
        assert_eq!(normalize_folder(identifier), expected);
    }

    #[rstest]
    #[case("/photos/")]
    #[case("photos")]
    #[case("/a/b/c")]
    #[case("x//")]
    fn test_normalize_folder_round_trip(#[case] folder: &str) {
        let normalized = normalize_folder(folder);
        assert!(normalized.ends_with('/'));
        assert!(!normalized.ends_with("//"));
        assert_eq!(normalize(&normalized), normalize(folder));
    }

    #[rstest]
    #[case("/", "")]
    #[case("", "")]
    #[case("/photos", "photos/")]
    #[case("/a/b/", "a/b/")]
    fn test_folder_prefix(#[case] folder: &str, #[case] expected: &str) {
        assert_eq!(folder_prefix(folder), expected);
    }

    #[rstest]
    #[case("photos/image.jpg", "/photos/image.jpg")]
    #[case("/photos/image.jpg", "/photos/image.jpg")]
    #[case("///x", "/x")]
    fn test_compute_file_identifier(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(compute_file_identifier(key), expected);
    }

    #[rstest]
    #[case("/photos/", "image.jpg", "photos/image.jpg")]
    #[case("/", "image.jpg", "image.jpg")]
    #[case("", "image.jpg", "image.jpg")]
    #[case("/photos/", "../../etc/passwd", "photos/passwd")]
    #[case("/photos/", "/other/folder/image.jpg", "photos/image.jpg")]
    fn test_combine_folder_and_file(#[case] folder: &str, #[case] file: &str, #[case] expected: &str) {
        assert_eq!(combine_folder_and_file(folder, file), expected);
    }

    #[rstest]
    #[case("/photos/", "2024", "/photos/2024/")]
    #[case("/", "photos", "/photos/")]
    #[case("/a", "/b/", "/a/b/")]
    fn test_combine_folder_and_folder_name(#[case] folder: &str, #[case] name: &str, #[case] expected: &str) {
        assert_eq!(combine_folder_and_folder_name(folder, name), expected);
    }

    #[rstest]
    #[case("/photos/", "photos/.keep")]
    #[case("/a/b", "a/b/.keep")]
    #[case("/", ".keep")]
    fn test_final_folder_identifier(#[case] folder: &str, #[case] expected: &str) {
        assert_eq!(final_folder_identifier(folder), expected);
    }

    #[rstest]
    #[case("/a/b/c.txt", "/a/b/")]
    #[case("/a/b/", "/a/")]
    #[case("/a", "/")]
    #[case("/", "/")]
    fn test_parent_folder(#[case] identifier: &str, #[case] expected: &str) {
        assert_eq!(parent_folder(identifier), expected);
    }

    #[rstest]
    #[case("/a/b/c.txt", "c.txt")]
    #[case("/a/b/", "b")]
    #[case("c.txt", "c.txt")]
    #[case("/", "")]
    fn test_basename(#[case] identifier: &str, #[case] expected: &str) {
        assert_eq!(basename(identifier), expected);
    }

    #[rstest]
    #[case("photos/.keep", true)]
    #[case(".keep", true)]
    #[case("photos/my.keep", false)]
    #[case("photos/.keep/", false)]
    #[case("photos/image.jpg", false)]
    fn test_is_marker(#[case] key: &str, #[case] expected: bool) {
        assert_eq!(is_marker(key), expected);
    }

    #[rstest]
    #[case("/photos/", "/photos/image.jpg", true)]
    #[case("/photos/", "/photos/2024/", true)]
    #[case("/photos/", "/photos/", true)]
    #[case("/photos", "/photos", true)]
    #[case("/photos/", "/photos-archive/image.jpg", false)]
    #[case("/photos/", "/other/image.jpg", false)]
    #[case("/", "/anything/at/all", true)]
    fn test_is_within(#[case] container: &str, #[case] candidate: &str, #[case] expected: bool) {
        assert_eq!(is_within(container, candidate), expected);
    }

    #[rstest]
    #[case("photos/image.jpg", "photos/image.jpg")]
    #[case("a//b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("/leading/slash", "leading/slash")]
    fn test_validate_key_valid(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(validate_key(key).unwrap(), expected);
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("..")]
    #[case("a\0b")]
    #[case("")]
    #[case("./.")]
    #[case("//")]
    fn test_validate_key_invalid(#[case] key: &str) {
        let err = validate_key(key).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }

    #[rstest]
    #[case("", "")]
    #[case("/", "")]
    #[case("photos/", "photos/")]
    #[case("photos", "photos")]
    fn test_validate_prefix(#[case] prefix: &str, #[case] expected: &str) {
        assert_eq!(validate_prefix(prefix).unwrap(), expected);
    }
}
