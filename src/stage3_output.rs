use crate::chunk::ChunkWriter;
use crate::error::{DownloadError, Result};
use crate::progress::ProgressTracker;
use crate::s3_client::BodyStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Bookkeeping shared by every task of one download.
#[derive(Debug)]
pub struct DownloadState {
    pub bytes_written: u64,
    /// `None` until a response reveals the object size.
    pub total_size: Option<u64>,
    /// Sequence number of the only chunk allowed to write next.
    pub next_sequence: u64,
    /// First terminal error; once set it is never replaced.
    pub error: Option<DownloadError>,
}

/// Stage 3: Ordered output
/// Lets chunks finish in any order but writes them to the sink strictly by
/// sequence number. A chunk whose turn has not come waits on `turn` rather
/// than polling.
pub struct OrderedOutput<W> {
    state: Mutex<DownloadState>,
    turn: Notify,
    sink: Mutex<Option<W>>,
    progress: Option<Arc<ProgressTracker>>,
}

fn output_closed() -> DownloadError {
    DownloadError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "output already finished",
    ))
}

impl<W> OrderedOutput<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, progress: Option<Arc<ProgressTracker>>) -> Self {
        Self {
            state: Mutex::new(DownloadState {
                bytes_written: 0,
                total_size: None,
                next_sequence: 1,
                error: None,
            }),
            turn: Notify::new(),
            sink: Mutex::new(Some(writer)),
            progress,
        }
    }

    pub async fn is_aborted(&self) -> bool {
        self.state.lock().await.error.is_some()
    }

    pub async fn total_size(&self) -> Option<u64> {
        self.state.lock().await.total_size
    }

    pub async fn set_total_size(&self, total: u64) {
        self.state.lock().await.total_size = Some(total);
        if let Some(progress) = &self.progress {
            progress.set_total(total);
        }
    }

    pub async fn bytes_written(&self) -> u64 {
        self.state.lock().await.bytes_written
    }

    /// Record `err` as the outcome of the download unless an earlier error
    /// already is. Wakes every chunk waiting for its turn.
    pub async fn record_error(&self, err: DownloadError) {
        let mut state = self.state.lock().await;
        if state.error.is_none() {
            warn!(error = %err, bytes_written = state.bytes_written, "download aborted");
            state.error = Some(err);
        } else {
            debug!(error = %err, "discarding error, download already aborted");
        }
        drop(state);
        self.turn.notify_waiters();
    }

    /// Wait until every chunk before `sequence` has been written.
    /// Returns `false` if the download was aborted in the meantime.
    async fn wait_turn(&self, sequence: u64) -> bool {
        loop {
            let notified = self.turn.notified();
            tokio::pin!(notified);
            // Register before looking at the state so a wakeup between the
            // check and the await is not lost.
            notified.as_mut().enable();

            {
                let state = self.state.lock().await;
                if state.error.is_some() {
                    return false;
                }
                if state.next_sequence == sequence {
                    return true;
                }
            }

            notified.await;
        }
    }

    async fn add_written(&self, len: u64) {
        self.state.lock().await.bytes_written += len;
        if let Some(progress) = &self.progress {
            progress.increment(len);
        }
    }

    async fn advance(&self, sequence: u64) {
        self.state.lock().await.next_sequence = sequence + 1;
        self.turn.notify_waiters();
    }

    /// Write a buffered chunk once its turn comes.
    /// Returns `false` when the download was aborted before that.
    pub async fn write_chunk(&self, chunk: ChunkWriter) -> Result<bool> {
        let sequence = chunk.sequence();
        if !self.wait_turn(sequence).await {
            debug!(sequence, "dropping chunk, download aborted");
            return Ok(false);
        }

        let len = chunk.len();
        {
            let mut sink = self.sink.lock().await;
            let writer = sink.as_mut().ok_or_else(output_closed)?;
            for part in chunk.into_parts() {
                writer.write_all(&part).await?;
            }
        }

        self.add_written(len).await;
        self.advance(sequence).await;
        debug!(sequence, bytes = len, "chunk written");

        Ok(true)
    }

    /// Copy `body` into the sink as chunk `sequence` without buffering it.
    /// The byte count is updated as data goes out, so a failure part way
    /// leaves `bytes_written` exact.
    pub async fn stream_body(&self, sequence: u64, mut body: BodyStream) -> Result<u64> {
        if !self.wait_turn(sequence).await {
            return Ok(0);
        }

        let mut written = 0u64;
        {
            let mut sink = self.sink.lock().await;
            let writer = sink.as_mut().ok_or_else(output_closed)?;

            while let Some(bytes) = body.next().await {
                let bytes = bytes.map_err(|e| DownloadError::Body(e.to_string()))?;
                writer.write_all(&bytes).await?;
                written += bytes.len() as u64;
                self.add_written(bytes.len() as u64).await;
            }
        }

        self.advance(sequence).await;
        Ok(written)
    }

    /// Flush and hand back the sink, or the first recorded error.
    pub async fn finish(&self) -> Result<(W, u64)> {
        let bytes_written = {
            let mut state = self.state.lock().await;
            if let Some(err) = state.error.take() {
                return Err(err);
            }
            state.bytes_written
        };

        let mut writer = self.sink.lock().await.take().ok_or_else(output_closed)?;
        writer.flush().await?;

        Ok((writer, bytes_written))
    }
}
