use crate::chunk::{ChunkJob, RangePlanner};
use crate::error::{DownloadError, ErrorClass, Result};
use crate::progress::ProgressTracker;
use crate::s3_client::{ObjectMetadata, ObjectResponse, ObjectStore};
use crate::stage1_queue::queue_chunks;
use crate::stage2_download::{download_worker, ChunkFetcher};
use crate::stage3_output::OrderedOutput;
use backon::Retryable;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_PART_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One worker per available CPU.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Everything one call to [`download`] needs besides the store and the sink.
#[derive(Debug, Clone, bon::Builder)]
pub struct DownloadRequest {
    #[builder(into)]
    pub key: String,

    /// Caller supplied `Range` header. When set the object is fetched with
    /// a single request and no chunking.
    #[builder(into)]
    pub range: Option<String>,

    #[builder(default = DEFAULT_PART_SIZE)]
    pub part_size: u64,

    #[builder(default = default_concurrency())]
    pub concurrency: usize,

    /// Retries per chunk after a transient body error.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: usize,

    /// First backoff delay between retries.
    #[builder(default = DEFAULT_RETRY_DELAY)]
    pub retry_delay: Duration,

    #[builder(default)]
    pub cancel: CancellationToken,

    pub progress: Option<Arc<ProgressTracker>>,
}

impl DownloadRequest {
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            return Err(DownloadError::Configuration(
                "part size must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(DownloadError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn explicit_range(&self) -> Option<&str> {
        self.range.as_deref().filter(|r| !r.trim().is_empty())
    }
}

#[derive(Debug)]
pub struct Downloaded<W> {
    pub writer: W,
    pub bytes_written: u64,
    /// Response metadata of the first chunk fetched. `None` when the object
    /// turned out to be empty.
    pub metadata: Option<ObjectMetadata>,
    /// Whether the caller asked for an explicit range.
    pub ranged: bool,
}

impl<W> Downloaded<W> {
    /// 206 when a sub-range of the object was served, 200 otherwise.
    pub fn status_code(&self) -> u16 {
        let partial = self
            .metadata
            .as_ref()
            .is_some_and(ObjectMetadata::is_partial);

        if self.ranged && partial {
            206
        } else {
            200
        }
    }
}

/// Download `request.key` from `store` into `writer`, in object byte order.
///
/// Without an explicit range the first chunk is fetched alone to learn the
/// object size, then the remaining chunks are fetched by
/// `request.concurrency` workers. If the size never shows up the chunks are
/// fetched one after another until the store reports the range as
/// unsatisfiable.
///
/// On error the bytes already written stay in the sink.
pub async fn download<W>(
    store: Arc<dyn ObjectStore>,
    request: DownloadRequest,
    writer: W,
) -> Result<Downloaded<W>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    request.validate()?;

    let range = request.explicit_range().map(str::to_owned);
    info!(
        key = %request.key,
        range = range.as_deref().unwrap_or("-"),
        part_size = request.part_size,
        concurrency = request.concurrency,
        "starting download"
    );

    let fetcher = Arc::new(ChunkFetcher::new(
        store,
        request.key.clone(),
        request.max_retries,
        request.retry_delay,
        request.cancel.clone(),
    ));
    let output = Arc::new(OrderedOutput::new(writer, request.progress.clone()));

    let result = match &range {
        Some(range) => download_single_range(&fetcher, &output, range).await.map(Some),
        None => download_multipart(&fetcher, &output, &request).await,
    };

    let metadata = match result {
        Ok(metadata) => metadata,
        Err(err) => {
            output.record_error(err).await;
            None
        }
    };

    let (writer, bytes_written) = match output.finish().await {
        Ok(done) => done,
        Err(err) => {
            if let Some(progress) = &request.progress {
                progress.abandon();
            }
            return Err(err);
        }
    };

    if let Some(progress) = &request.progress {
        progress.finish();
    }
    info!(key = %request.key, bytes_written, "download complete");

    Ok(Downloaded {
        writer,
        bytes_written,
        metadata,
        ranged: range.is_some(),
    })
}

async fn stream_range<W>(
    fetcher: &ChunkFetcher,
    output: &OrderedOutput<W>,
    job: &ChunkJob,
) -> Result<ObjectMetadata>
where
    W: AsyncWrite + Unpin + Send,
{
    let ObjectResponse { metadata, body } = fetcher.open(&job.range_header()).await?;

    match output.stream_body(job.sequence, body).await {
        Ok(_) => Ok(metadata),
        Err(DownloadError::Body(message)) => match output.bytes_written().await {
            0 => Err(DownloadError::Body(message)),
            written => Err(DownloadError::Interrupted { written, message }),
        },
        Err(err) => Err(err),
    }
}

/// Fetch a caller supplied range with one request and stream it as is.
/// A broken body is retried only while nothing has reached the sink.
async fn download_single_range<W>(
    fetcher: &ChunkFetcher,
    output: &OrderedOutput<W>,
    range: &str,
) -> Result<ObjectMetadata>
where
    W: AsyncWrite + Unpin + Send,
{
    let job = ChunkJob::explicit(1, range);
    debug!(range, "single range download");

    let attempt = || stream_range(fetcher, output, &job);
    let retrying = attempt
        .retry(fetcher.backoff())
        .when(DownloadError::is_transient);

    fetcher.cancellable(retrying).await
}

async fn download_multipart<W>(
    fetcher: &Arc<ChunkFetcher>,
    output: &Arc<OrderedOutput<W>>,
    request: &DownloadRequest,
) -> Result<Option<ObjectMetadata>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut planner = RangePlanner::new(request.part_size);
    let Some(probe) = planner.next_job(None) else {
        return Ok(None);
    };

    let first = match fetcher.fetch(&probe).await {
        Ok(fetched) => fetched,
        Err(err) if err.class() == ErrorClass::RangeExhausted => {
            debug!("first range not satisfiable, object is empty");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let metadata = first.metadata;
    if first.whole_object {
        debug!(bytes = first.data.len(), "store sent the whole object");
        output.set_total_size(first.data.len()).await;
        output.write_chunk(first.data).await?;
        return Ok(Some(metadata));
    }

    let total = metadata.total_size();
    if let Some(total) = total {
        output.set_total_size(total).await;
    }
    output.write_chunk(first.data).await?;

    match total {
        Some(total) => dispatch(fetcher, output, planner, total, request.concurrency).await,
        None => sequential(fetcher, output, planner).await?,
    }

    Ok(Some(metadata))
}

/// No more workers than jobs left to fetch.
fn worker_count(planner: &RangePlanner, total: u64, concurrency: usize) -> usize {
    let remaining = usize::try_from(planner.remaining_jobs(total)).unwrap_or(usize::MAX);
    concurrency.min(remaining).max(1)
}

/// Fetch the rest of an object of known size with a pool of workers.
async fn dispatch<W>(
    fetcher: &Arc<ChunkFetcher>,
    output: &Arc<OrderedOutput<W>>,
    mut planner: RangePlanner,
    total: u64,
    concurrency: usize,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    if planner.is_exhausted(Some(total)) {
        debug!(total, "object fits in the first chunk");
        return;
    }

    let workers = worker_count(&planner, total, concurrency);
    info!(total, workers, "dispatching chunks to workers");

    let (tx, rx) = flume::bounded(workers);
    let workers: Vec<_> = (0..workers)
        .map(|id| {
            tokio::spawn(download_worker(
                id,
                fetcher.clone(),
                rx.clone(),
                output.clone(),
            ))
        })
        .collect();
    drop(rx);

    queue_chunks(&mut planner, total, tx, output).await;

    for handle in workers {
        if let Err(err) = handle.await {
            output.record_error(err.into()).await;
        }
    }
}

/// Fetch the rest of an object of unknown size one chunk at a time.
async fn sequential<W>(
    fetcher: &ChunkFetcher,
    output: &OrderedOutput<W>,
    mut planner: RangePlanner,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    info!("object size unknown, fetching chunks sequentially");

    loop {
        let total = output.total_size().await;
        let Some(job) = planner.next_job(total) else {
            break;
        };

        let fetched = match fetcher.fetch(&job).await {
            Ok(fetched) => fetched,
            Err(err) if err.class() == ErrorClass::RangeExhausted => {
                debug!(sequence = job.sequence, "range not satisfiable, end of object");
                break;
            }
            Err(err) => return Err(err),
        };

        if fetched.data.is_empty() {
            debug!(sequence = job.sequence, "empty chunk, end of object");
            break;
        }

        if total.is_none() {
            if let Some(total) = fetched.metadata.total_size() {
                output.set_total_size(total).await;
            }
        }

        output.write_chunk(fetched.data).await?;
    }

    Ok(())
}
