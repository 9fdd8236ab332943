use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use reqwest::header::{
    HeaderMap, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, LAST_MODIFIED,
    RANGE,
};
use reqwest::Client;

use crate::error::{StoreError, StoreErrorKind};
use crate::s3_client::{ObjectMetadata, ObjectResponse, ObjectStore};

/// Serves keys relative to a base URL from any server that honours
/// `Range` requests.
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, key: &str) -> String {
        if key.is_empty() {
            return self.base_url.clone();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

fn header(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn fetch_range(
        &self,
        key: &str,
        range: Option<&str>,
    ) -> std::result::Result<ObjectResponse, StoreError> {
        let mut request = self.client.get(self.url(key));
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(|e| {
            StoreError::new(StoreErrorKind::Unavailable, format!("GET request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::from_response(
                Some(status.as_u16()),
                None,
                format!("GET request failed with status: {status}"),
            ));
        }

        let headers = response.headers();
        let metadata = ObjectMetadata {
            content_length: header(headers, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_range: header(headers, CONTENT_RANGE),
            content_type: header(headers, CONTENT_TYPE),
            etag: header(headers, ETAG),
            last_modified: header(headers, LAST_MODIFIED),
            cache_control: header(headers, CACHE_CONTROL),
        };

        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        Ok(ObjectResponse { metadata, body })
    }
}
