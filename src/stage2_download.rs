use crate::chunk::{ChunkJob, ChunkProgress, ChunkWriter, FetchedChunk};
use crate::error::{DownloadError, ErrorClass, Result, StoreError, StoreErrorKind};
use crate::s3_client::{ObjectMetadata, ObjectResponse, ObjectStore};
use crate::stage3_output::OrderedOutput;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fetches chunks of one object, retrying interrupted bodies.
pub struct ChunkFetcher {
    store: Arc<dyn ObjectStore>,
    key: String,
    max_retries: usize,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl ChunkFetcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: String,
        max_retries: usize,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            key,
            max_retries,
            retry_delay,
            cancel,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.retry_delay)
            .with_max_delay(Duration::from_secs(5))
    }

    /// Run `fut` unless the caller cancels first.
    pub async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            res = fut => res,
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled),
        }
    }

    pub async fn open(&self, range: &str) -> Result<ObjectResponse> {
        Ok(self.store.fetch_range(&self.key, Some(range)).await?)
    }

    async fn fetch_once(&self, job: &ChunkJob) -> Result<FetchedChunk> {
        let ObjectResponse { metadata, mut body } = self.open(&job.range_header()).await?;

        // A response without `Content-Range` is the whole object, which
        // only lines up with a chunk that starts at byte 0.
        let whole_object = !metadata.is_ranged();
        let mut data = if whole_object && job.start() == Some(0) {
            ChunkWriter::new(job.sequence, None)
        } else if !whole_object && metadata.range_start() == job.start() {
            ChunkWriter::for_job(job)
        } else {
            return Err(unexpected_range(job, &metadata));
        };

        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(|e| DownloadError::Body(e.to_string()))?;
            if data.write(bytes) == ChunkProgress::Full {
                break;
            }
        }

        Ok(FetchedChunk {
            metadata,
            data,
            whole_object,
        })
    }

    /// Fetch one chunk into memory, retrying the same range on transient
    /// body errors up to `max_retries` times.
    pub async fn fetch(&self, job: &ChunkJob) -> Result<FetchedChunk> {
        let attempt = || self.fetch_once(job);
        let retrying = attempt
            .retry(self.backoff())
            .when(DownloadError::is_transient)
            .notify(|err: &DownloadError, delay: Duration| {
                warn!(
                    sequence = job.sequence,
                    range = %job.range_header(),
                    error = %err,
                    ?delay,
                    "retrying chunk"
                );
            });

        self.cancellable(retrying).await
    }
}

fn unexpected_range(job: &ChunkJob, metadata: &ObjectMetadata) -> DownloadError {
    let served = metadata
        .content_range
        .as_deref()
        .unwrap_or("the whole object");
    StoreError::new(
        StoreErrorKind::UnexpectedRange,
        format!("requested {} but the store sent {}", job.range_header(), served),
    )
    .into()
}

/// Stage 2: Download worker
/// Pulls jobs off the queue, fetches them and hands them to the ordered
/// output. Once the download is aborted it keeps draining the queue
/// without fetching so the producer never blocks on a full channel.
pub async fn download_worker<W>(
    id: usize,
    fetcher: Arc<ChunkFetcher>,
    rx: flume::Receiver<ChunkJob>,
    output: Arc<OrderedOutput<W>>,
) where
    W: AsyncWrite + Unpin + Send,
{
    while let Ok(job) = rx.recv_async().await {
        if output.is_aborted().await {
            continue;
        }

        debug!(worker = id, sequence = job.sequence, range = %job.range_header(), "fetching chunk");

        let chunk = match fetcher.fetch(&job).await {
            Ok(fetched) => fetched.data,
            // Past the end of the object: nothing to write, but later
            // chunks still need this sequence number to go by.
            Err(err) if err.class() == ErrorClass::RangeExhausted => {
                debug!(worker = id, sequence = job.sequence, "range past end of object");
                ChunkWriter::new(job.sequence, Some(0))
            }
            Err(err) => {
                output.record_error(err).await;
                continue;
            }
        };

        if let Err(err) = output.write_chunk(chunk).await {
            output.record_error(err).await;
        }
    }

    debug!(worker = id, "worker finished");
}
