//! Public URL derivation.
//!
//! Backends hand out a media link per object. With a base URI configured
//! (usually a CDN in front of the bucket) the backend's canonical prefix is
//! swapped for it.

use std::borrow::Cow;

/// Authenticated-browser host for GCS objects: `{GCS_BASE_URL}/{bucket}/{key}`.
pub const GCS_BASE_URL: &str = "https://storage.cloud.google.com";
/// JSON API download endpoint: `{GCS_DOWNLOAD_URL}/{bucket}/o/{urlencoded key}?...`.
pub const GCS_DOWNLOAD_URL: &str = "https://www.googleapis.com/download/storage/v1/b";

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

/// Public URL for an object given its media link.
///
/// Without a base URI the media link is returned untouched. Otherwise the
/// first matching prefix is replaced by the base URI (trailing separators
/// trimmed) and any query string is dropped:
/// - `https://storage.cloud.google.com/{bucket}`
/// - `https://www.googleapis.com/download/storage/v1/b/{bucket}/o`, matched
///   against the URL-decoded link
/// - the backend's own `media_prefix`, if it has one
///
/// Links matching none of these are returned untouched.
pub fn public_url(media_link: &str, bucket: &str, media_prefix: Option<&str>, base_uri: Option<&str>) -> String {
    let Some(base) = base_uri.map(|uri| uri.trim_end_matches('/')).filter(|uri| !uri.is_empty()) else {
        return media_link.to_string();
    };

    if let Some(rest) = media_link.strip_prefix(&format!("{GCS_BASE_URL}/{bucket}")) {
        return format!("{base}{}", strip_query(rest));
    }

    let download_prefix = format!("{GCS_DOWNLOAD_URL}/{bucket}/o");
    if media_link.starts_with(&download_prefix) {
        let decoded = urlencoding::decode(media_link).unwrap_or(Cow::Borrowed(media_link));
        if let Some(rest) = strip_query(&decoded).strip_prefix(&download_prefix) {
            return format!("{base}{rest}");
        }
    }

    if let Some(prefix) = media_prefix.filter(|prefix| !prefix.is_empty())
        && let Some(rest) = media_link.strip_prefix(prefix)
    {
        return format!("{base}{}", strip_query(rest));
    }

    media_link.to_string()
}
