use crate::error::{DownloadError, Result};

/// Where the CLI fetches an object from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    S3 { bucket: String, key: String },
    /// The full URL is the object; it is fetched with an empty key.
    Http { url: String },
}

impl SourceUri {
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(SourceUri::Http {
                url: uri.to_string(),
            });
        }

        let Some(without_prefix) = uri.strip_prefix("s3://") else {
            return Err(DownloadError::InvalidUri(
                "URI must start with s3://, http:// or https://".to_string(),
            ));
        };

        let (bucket, key) = without_prefix
            .split_once('/')
            .unwrap_or((without_prefix, ""));

        if bucket.is_empty() {
            return Err(DownloadError::InvalidUri("Bucket name is missing".to_string()));
        }

        if key.is_empty() {
            return Err(DownloadError::InvalidUri("Object key is missing".to_string()));
        }

        Ok(SourceUri::S3 {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}
