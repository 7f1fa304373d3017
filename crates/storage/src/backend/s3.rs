//! S3-compatible storage backend.
//!
//! Talks to any service speaking the S3 XML API with path-style addressing:
//! Google Cloud Storage through its interoperability endpoint
//! (`https://storage.googleapis.com` with HMAC keys), AWS S3, MinIO and
//! friends.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file. Each
//! storage specifies its own `key_id` and `key_secret`; a missing bucket name
//! or missing credentials are reported as
//! [`ConfigurationMissing`](crate::error::ErrorKind::ConfigurationMissing)
//! before any request is made.

use super::{BoxAsyncRead, ListStream};
use crate::error::{ErrorKind, Result};
use crate::models::{ListEntry, ObjectRecord, guess_content_type};
use crate::path::{validate_key, validate_prefix};
use crate::StorageBackend;
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
};
use exn::ResultExt;
use time::OffsetDateTime;

const DEFAULT_REGION: &str = "auto";

/// S3-compatible storage backend.
///
/// Stores objects in a bucket, optionally under a key prefix. All keys are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use bucketfs_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "gcs",
///     "my-bucket",
///     None,
///     None,
///     Some("https://storage.googleapis.com".to_string()),
///     "GOOG1EXAMPLE",
///     "hmac-secret",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging and cache keys)
    /// * `bucket` - Bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - Region, defaults to `auto` (what GCS expects)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID (HMAC key for GCS)
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: Option<String>,
        endpoint: Option<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            exn::bail!(ErrorKind::ConfigurationMissing("bucket".to_string()));
        }
        let (key_id, key_secret) = (key_id.into(), key_secret.into());
        if key_id.is_empty() || key_secret.is_empty() {
            exn::bail!(ErrorKind::ConfigurationMissing("credentials".to_string()));
        }
        let prefix = prefix.as_deref().map(validate_key).transpose()?;
        let region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = endpoint
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://s3.{region}.amazonaws.com"));
        let credentials = Credentials::new(key_id, key_secret, None, None, "bucketfs-config");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region))
            // One attempt per call: failures surface to the caller unretried.
            .retry_config(RetryConfig::disabled())
            // Use path-style addressing for compatibility with GCS
            // interoperability and other S3-compatible services.
            .force_path_style(true)
            .endpoint_url(&endpoint)
            .build();
        tracing::debug!(storage = %name, bucket = %bucket, endpoint = %endpoint, "S3 backend configured");
        Ok(Self {
            name,
            client: Client::from_conf(config),
            bucket,
            prefix,
            endpoint,
        })
    }

    /// Construct the full object key from a relative key.
    fn full_key(&self, key: &str) -> Result<String> {
        Ok(join_prefix(self.prefix.as_deref(), &validate_key(key)?))
    }

    fn media_link(&self, key: &str) -> String {
        media_link(&self.endpoint, &self.bucket, &join_prefix(self.prefix.as_deref(), key))
    }

    fn record(&self, key: &str, size: Option<i64>, modified: Option<&DateTime>) -> Result<ObjectRecord> {
        let modified = modified.map(parse_datetime).transpose()?.unwrap_or_else(OffsetDateTime::now_utc);
        Ok(ObjectRecord::new(key, &self.bucket, size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0), modified)
            .with_media_link(self.media_link(key)))
    }

    /// Classify an SDK error into an actionable kind.
    fn classify<E: ProvideErrorMetadata + std::error::Error + 'static>(
        err: SdkError<E, HttpResponse>,
        key: &str,
    ) -> ErrorKind {
        let status = err.raw_response().map(|r| r.status().as_u16());
        match classify_code(err.code(), status) {
            Some(Classified::NotFound) => ErrorKind::NotFound(key.to_string()),
            Some(Classified::Credentials) => ErrorKind::CredentialsInvalid,
            None => ErrorKind::BackendUnavailable(DisplayErrorContext(&err).to_string()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Classified {
    NotFound,
    Credentials,
}

fn classify_code(code: Option<&str>, status: Option<u16>) -> Option<Classified> {
    match (code, status) {
        (Some("NoSuchKey" | "NotFound"), _) | (_, Some(404)) => Some(Classified::NotFound),
        (Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _) | (_, Some(401 | 403)) => {
            Some(Classified::Credentials)
        },
        _ => None,
    }
}

fn join_prefix(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

/// Strip the configured prefix from a full key to get the relative key.
fn strip_prefix<'k>(prefix: Option<&str>, key: &'k str) -> &'k str {
    match prefix {
        Some(prefix) => key.strip_prefix(prefix.trim_end_matches('/')).and_then(|s| s.strip_prefix('/')).unwrap_or(key),
        None => key,
    }
}

fn media_link(endpoint: &str, bucket: &str, full_key: &str) -> String {
    let encoded: Vec<_> = full_key.split('/').map(|segment| urlencoding::encode(segment)).collect();
    format!("{endpoint}/{bucket}/{}", encoded.join("/"))
}

/// Convert AWS DateTime to OffsetDateTime.
fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
        .or_raise(|| ErrorKind::BackendUnavailable("S3 datetime out of range".to_string()))
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn media_prefix(&self) -> Option<String> {
        Some(format!("{}/{}", self.endpoint, self.bucket))
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: Option<&str>) -> Result<ObjectRecord> {
        let full_key = self.full_key(key)?;
        let content_type = content_type.map(str::to_string).unwrap_or_else(|| guess_content_type(key));
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(&content_type)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        let key = validate_key(key)?;
        let record = self.record(&key, i64::try_from(data.len()).ok(), None)?;
        Ok(record.with_content_type(content_type))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let full_key = self.full_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        let bytes = output.body.collect().await.or_raise(|| ErrorKind::BackendUnavailable(full_key.clone()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn reader(&self, key: &str) -> Result<BoxAsyncRead> {
        let full_key = self.full_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<ObjectRecord> {
        let full_from = self.full_key(from)?;
        let full_to = self.full_key(to)?;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, urlencoding::encode(&full_from)))
            .key(&full_to)
            .send()
            .await
            .map_err(|e| Self::classify(e, from))?;
        self.stat(to).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectRecord> {
        let full_key = self.full_key(key)?;
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        let key = validate_key(key)?;
        let record = self.record(&key, output.content_length(), output.last_modified())?;
        Ok(match output.content_type() {
            Some(content_type) => record.with_content_type(content_type),
            None => record,
        })
    }

    fn list_stream<'a>(&'a self, prefix: &'a str, delimiter: Option<char>) -> ListStream<'a> {
        let full_prefix = match validate_prefix(prefix) {
            Ok(pfx) if pfx.is_empty() => self.prefix.as_deref().map(|p| format!("{p}/")).unwrap_or_default(),
            Ok(pfx) => join_prefix(self.prefix.as_deref(), &pfx),
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        Box::pin(stream! {
            let mut token: Option<String> = None;
            loop {
                let page = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&full_prefix)
                    .set_delimiter(delimiter.map(String::from))
                    .set_continuation_token(token.take())
                    .send()
                    .await;
                let output = match page {
                    Ok(output) => output,
                    Err(e) => {
                        yield Err(exn::Exn::from(Self::classify(e, &full_prefix)));
                        return;
                    },
                };
                for object in output.contents() {
                    let Some(key) = object.key() else { continue };
                    let key = strip_prefix(self.prefix.as_deref(), key);
                    yield self.record(key, object.size(), object.last_modified()).map(ListEntry::Object);
                }
                for common in output.common_prefixes() {
                    if let Some(sub) = common.prefix() {
                        yield Ok(ListEntry::Prefix(strip_prefix(self.prefix.as_deref(), sub).to_string()));
                    }
                }
                match (output.is_truncated(), output.next_continuation_token()) {
                    (Some(true), Some(next)) => token = Some(next.to_string()),
                    _ => break,
                }
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Self::classify(e, &self.bucket))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "photos/image.jpg", "photos/image.jpg")]
    #[case(Some("library"), "photos/image.jpg", "library/photos/image.jpg")]
    #[case(Some("library/"), "photos/image.jpg", "library/photos/image.jpg")]
    fn test_join_prefix(#[case] prefix: Option<&str>, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(join_prefix(prefix, key), expected);
    }

    #[rstest]
    #[case(None, "photos/image.jpg", "photos/image.jpg")]
    #[case(Some("library"), "library/photos/image.jpg", "photos/image.jpg")]
    #[case(Some("library/"), "library/photos/2024/", "photos/2024/")]
    fn test_strip_prefix(#[case] prefix: Option<&str>, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(strip_prefix(prefix, key), expected);
    }

    #[rstest]
    #[case(Some("NoSuchKey"), Some(404), Some(Classified::NotFound))]
    #[case(None, Some(404), Some(Classified::NotFound))]
    #[case(Some("AccessDenied"), Some(403), Some(Classified::Credentials))]
    #[case(Some("SignatureDoesNotMatch"), None, Some(Classified::Credentials))]
    #[case(None, Some(401), Some(Classified::Credentials))]
    #[case(Some("SlowDown"), Some(503), None)]
    #[case(None, None, None)]
    fn test_classify_code(#[case] code: Option<&str>, #[case] status: Option<u16>, #[case] expected: Option<Classified>) {
        assert_eq!(classify_code(code, status), expected);
    }

    #[test]
    fn test_media_link_encodes_segments() {
        assert_eq!(
            media_link("https://storage.googleapis.com", "bucket", "photos/my image.jpg"),
            "https://storage.googleapis.com/bucket/photos/my%20image.jpg"
        );
    }

    #[tokio::test]
    async fn test_new_requires_bucket() {
        let err = S3Backend::new("gcs", " ", None, None, None, "id", "secret").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ConfigurationMissing(setting) if setting == "bucket"));
    }

    #[tokio::test]
    async fn test_new_requires_credentials() {
        let err = S3Backend::new("gcs", "bucket", None, None, None, "", "").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ConfigurationMissing(setting) if setting == "credentials"));
    }

    #[tokio::test]
    async fn test_client_makes_a_single_attempt() {
        let backend = S3Backend::new("gcs", "bucket", None, None, None, "id", "secret").await.unwrap();
        let attempts = backend.client.config().retry_config().map(|retry| retry.max_attempts());
        assert_eq!(attempts, Some(1));
    }

    #[tokio::test]
    async fn test_media_prefix() {
        let backend = S3Backend::new(
            "gcs",
            "bucket",
            Some("library".to_string()),
            None,
            Some("https://storage.googleapis.com/".to_string()),
            "id",
            "secret",
        )
        .await
        .unwrap();
        assert_eq!(backend.media_prefix().as_deref(), Some("https://storage.googleapis.com/bucket"));
        assert_eq!(
            backend.media_link("photos/image.jpg"),
            "https://storage.googleapis.com/bucket/library/photos/image.jpg"
        );
        assert_eq!(backend.full_key("/photos/image.jpg").unwrap(), "library/photos/image.jpg");
    }
}
