use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::DateTimeFormat;
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio_util::io::ReaderStream;

use crate::error::StoreError;

/// Body of a fetched range. Errors yielded here mean the stream broke after
/// the store accepted the request.
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Response headers of a single ranged GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: Option<String>,
}

impl ObjectMetadata {
    fn content_range(&self) -> Option<&str> {
        self.content_range.as_deref().filter(|r| !r.is_empty())
    }

    /// Size of the whole object, if the response reveals it.
    ///
    /// Taken from the `Content-Range` total when present, else from
    /// `Content-Length` (the store answered with the complete object).
    pub fn total_size(&self) -> Option<u64> {
        match self.content_range() {
            Some(range) => parse_content_range_total(range),
            None => self.content_length,
        }
    }

    /// Whether the store answered with a `Content-Range`.
    pub fn is_ranged(&self) -> bool {
        self.content_range().is_some()
    }

    /// First byte served, from the `Content-Range` header.
    pub fn range_start(&self) -> Option<u64> {
        self.content_range().and_then(parse_content_range_start)
    }

    /// Whether this response carries only part of the object.
    pub fn is_partial(&self) -> bool {
        match self.content_range() {
            Some(range) => parse_content_range_total(range) != self.content_length,
            None => false,
        }
    }
}

/// Start from `bytes <start>-<end>/<total>`. `bytes */<total>` has none.
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// Total from `bytes <start>-<end>/<total>` or `bytes */<total>`.
/// An unknown total (`*`) yields `None`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

pub struct ObjectResponse {
    pub metadata: ObjectMetadata,
    pub body: BodyStream,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// GET `key`, limited to `range` (an HTTP `Range` header value) if given.
    async fn fetch_range(
        &self,
        key: &str,
        range: Option<&str>,
    ) -> std::result::Result<ObjectResponse, StoreError>;
}

pub struct S3Store {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key_prefix: String::new(),
        }
    }

    /// Prepend `prefix` to every key fetched through this store.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn store_error(err: SdkError<GetObjectError>) -> StoreError {
    let status = err.raw_response().map(|r| r.status().as_u16());
    StoreError::from_response(
        status,
        err.code(),
        format!("GET request failed: {}", DisplayErrorContext(&err)),
    )
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn fetch_range(
        &self,
        key: &str,
        range: Option<&str>,
    ) -> std::result::Result<ObjectResponse, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .set_range(range.map(str::to_owned))
            .send()
            .await
            .map_err(store_error)?;

        let metadata = ObjectMetadata {
            content_length: response.content_length().and_then(|l| u64::try_from(l).ok()),
            content_range: response.content_range().map(str::to_owned),
            content_type: response.content_type().map(str::to_owned),
            etag: response.e_tag().map(str::to_owned),
            last_modified: response
                .last_modified()
                .and_then(|t| t.fmt(DateTimeFormat::HttpDate).ok()),
            cache_control: response.cache_control().map(str::to_owned),
        };

        let body = ReaderStream::new(response.body.into_async_read()).boxed();

        Ok(ObjectResponse { metadata, body })
    }
}
