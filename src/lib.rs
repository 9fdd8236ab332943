pub mod chunk;
pub mod cli;
pub mod downloader;
pub mod error;
pub mod http_client;
pub mod progress;
pub mod s3_client;
pub mod stage1_queue;
pub mod stage2_download;
pub mod stage3_output;
pub mod uri;

pub use downloader::{download, DownloadRequest, Downloaded};
pub use error::{DownloadError, ErrorClass, Result, StoreError, StoreErrorKind};
pub use s3_client::{ObjectMetadata, ObjectResponse, ObjectStore};
