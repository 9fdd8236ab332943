use crate::chunk::{ChunkJob, RangePlanner};
use crate::stage3_output::OrderedOutput;
use tokio::io::AsyncWrite;
use tracing::debug;

/// Stage 1: Queue up download jobs
/// Plans ranges up to `total` and sends them to a bounded channel, which
/// gives natural backpressure. Stops early once the download is aborted.
/// Returns the number of jobs queued.
pub async fn queue_chunks<W>(
    planner: &mut RangePlanner,
    total: u64,
    tx: flume::Sender<ChunkJob>,
    output: &OrderedOutput<W>,
) -> u64
where
    W: AsyncWrite + Unpin + Send,
{
    let mut queued = 0;

    while !output.is_aborted().await {
        let Some(job) = planner.next_job(Some(total)) else {
            break;
        };

        // Every receiver gone means every worker has exited.
        if tx.send_async(job).await.is_err() {
            break;
        }
        queued += 1;
    }

    debug!(queued, cursor = planner.cursor(), "job queue closed");
    queued
}
