use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use s3proxy_dl::cli::DownloadArgs;
use s3proxy_dl::downloader::download;
use s3proxy_dl::s3_client::S3Store;
use s3proxy_dl::StoreErrorKind;
use std::sync::Arc;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::localstack::LocalStack;
use tokio::sync::OnceCell;

/// Shared LocalStack container for all tests
static LOCALSTACK: OnceCell<Arc<ContainerAsync<LocalStack>>> = OnceCell::const_new();

/// Get or initialize the shared LocalStack container
async fn get_localstack() -> Arc<ContainerAsync<LocalStack>> {
    LOCALSTACK
        .get_or_init(|| async {
            let container = LocalStack::default()
                .with_env_var("SERVICES", "s3")
                .start()
                .await
                .expect("Failed to start LocalStack");
            Arc::new(container)
        })
        .await
        .clone()
}

/// Helper to create an S3 client configured for LocalStack
async fn create_test_client() -> (Client, String) {
    let localstack = get_localstack().await;
    let port = localstack
        .get_host_port_ipv4(4566)
        .await
        .expect("Failed to get port");
    let endpoint_url = format!("http://127.0.0.1:{}", port);

    let credentials = Credentials::new("test", "test", None, None, "test");

    let config = aws_config::defaults(BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(Region::new("us-east-1"))
        .endpoint_url(endpoint_url.clone())
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(true)
        .build();

    (Client::from_conf(s3_config), endpoint_url)
}

/// Helper to create an S3Store configured for LocalStack
async fn create_store(endpoint: &str, bucket: &str) -> Arc<S3Store> {
    let credentials = Credentials::new("test", "test", None, None, "test");

    let config = aws_config::defaults(BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(Region::new("us-east-1"))
        .endpoint_url(endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(true)
        .build();

    Arc::new(S3Store::new(aws_sdk_s3::Client::from_conf(s3_config), bucket))
}

/// Upload test data to S3
async fn upload_test_file(
    client: &Client,
    bucket: &str,
    key: &str,
    content: Vec<u8>,
) -> anyhow::Result<()> {
    // Create bucket
    client
        .create_bucket()
        .bucket(bucket)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create bucket: {}", e))?;

    // Upload file
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(content))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to upload file: {}", e))?;

    Ok(())
}

#[tokio::test]
async fn test_download_small_file() -> anyhow::Result<()> {
    let (client, endpoint) = create_test_client().await;
    let bucket = "test-download-bucket";
    let key = "test-file.txt";
    let test_content = b"Hello from s3proxy-dl integration test!".to_vec();

    upload_test_file(&client, bucket, key, test_content.clone()).await?;

    let store = create_store(&endpoint, bucket).await;
    let args = DownloadArgs::builder().concurrency(2).quiet(true).build();

    let downloaded = download(store, args.request(key, None), Vec::new()).await?;

    assert_eq!(downloaded.writer, test_content);
    assert_eq!(downloaded.status_code(), 200);

    Ok(())
}

#[tokio::test]
async fn test_download_large_file_with_chunks() -> anyhow::Result<()> {
    let (client, endpoint) = create_test_client().await;
    let bucket = "test-chunked-bucket";
    let key = "large-file.bin";

    // 10MB test file with pattern
    let test_content: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 256) as u8).collect();

    upload_test_file(&client, bucket, key, test_content.clone()).await?;

    let store = create_store(&endpoint, bucket).await;

    // 3MB parts: four chunks, the last one short
    let args = DownloadArgs::builder()
        .concurrency(4)
        .part_size(3 * 1024 * 1024)
        .quiet(true)
        .build();

    let downloaded = download(store, args.request(key, None), Vec::new()).await?;

    assert_eq!(downloaded.bytes_written, test_content.len() as u64);
    assert_eq!(downloaded.writer, test_content);

    let metadata = downloaded.metadata.expect("first chunk metadata");
    assert_eq!(metadata.total_size(), Some(test_content.len() as u64));

    Ok(())
}

#[tokio::test]
async fn test_download_explicit_range() -> anyhow::Result<()> {
    let (client, endpoint) = create_test_client().await;
    let bucket = "test-range-bucket";
    let key = "ranged.bin";
    let test_content: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();

    upload_test_file(&client, bucket, key, test_content.clone()).await?;

    let store = create_store(&endpoint, bucket).await;
    let args = DownloadArgs::builder().quiet(true).build();
    let request = args.request(key, Some("bytes=100-199".to_string()));

    let downloaded = download(store, request, Vec::new()).await?;

    assert_eq!(downloaded.bytes_written, 100);
    assert_eq!(downloaded.writer, &test_content[100..200]);
    assert_eq!(downloaded.status_code(), 206);

    Ok(())
}

#[tokio::test]
async fn test_download_empty_file() -> anyhow::Result<()> {
    let (client, endpoint) = create_test_client().await;
    let bucket = "test-empty-bucket";
    let key = "empty.txt";

    upload_test_file(&client, bucket, key, Vec::new()).await?;

    let store = create_store(&endpoint, bucket).await;
    let args = DownloadArgs::builder().quiet(true).build();

    let downloaded = download(store, args.request(key, None), Vec::new()).await?;

    assert!(downloaded.writer.is_empty());
    assert_eq!(downloaded.bytes_written, 0);

    Ok(())
}

#[tokio::test]
async fn test_download_single_byte() -> anyhow::Result<()> {
    let (client, endpoint) = create_test_client().await;
    let bucket = "test-single-byte-bucket";
    let key = "single.bin";
    let test_content = vec![42u8];

    upload_test_file(&client, bucket, key, test_content.clone()).await?;

    let store = create_store(&endpoint, bucket).await;
    let args = DownloadArgs::builder().concurrency(1).quiet(true).build();

    let downloaded = download(store, args.request(key, None), Vec::new()).await?;

    assert_eq!(downloaded.writer, test_content);

    Ok(())
}

#[tokio::test]
async fn test_download_missing_key() -> anyhow::Result<()> {
    let (client, endpoint) = create_test_client().await;
    let bucket = "test-missing-key-bucket";

    upload_test_file(&client, bucket, "present.txt", b"here".to_vec()).await?;

    let store = create_store(&endpoint, bucket).await;
    let args = DownloadArgs::builder().quiet(true).build();

    let err = download(store, args.request("absent.txt", None), Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        s3proxy_dl::DownloadError::Store(e) if e.kind == StoreErrorKind::NotFound
    ));
    assert_eq!(err.status_code(), 404);

    Ok(())
}
