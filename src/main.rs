use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::Parser;
use s3proxy_dl::cli::Args;
use s3proxy_dl::downloader;
use s3proxy_dl::http_client::HttpStore;
use s3proxy_dl::progress::ProgressTracker;
use s3proxy_dl::s3_client::{ObjectStore, S3Store};
use s3proxy_dl::uri::SourceUri;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the object.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    Ok(())
}

/// Returns the store and the key to fetch from it.
async fn build_store(args: &Args, uri: SourceUri) -> (Arc<dyn ObjectStore>, String) {
    match uri {
        SourceUri::S3 { bucket, key } => {
            let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
            let mut builder = aws_sdk_s3::config::Builder::from(&config);
            if let Some(endpoint) = &args.endpoint_url {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }

            let store = S3Store::new(aws_sdk_s3::Client::from_conf(builder.build()), bucket)
                .with_key_prefix(&args.key_prefix);
            (Arc::new(store), key)
        }
        SourceUri::Http { url } => (Arc::new(HttpStore::new(url)), String::new()),
    }
}

async fn run(args: Args) -> Result<()> {
    init_tracing(&args.log_level)?;

    let uri = SourceUri::parse(&args.uri)?;
    let (store, key) = build_store(&args, uri).await;

    let mut request = args.download.request(key, args.range.clone());
    request.progress = Some(ProgressTracker::new(args.download.quiet));

    let cancel = request.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling download");
            cancel.cancel();
        }
    });

    let downloaded = downloader::download(store, request, tokio::io::stdout()).await?;
    debug!(
        status = downloaded.status_code(),
        bytes_written = downloaded.bytes_written,
        "done"
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
