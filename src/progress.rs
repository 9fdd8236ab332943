use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

/// Byte counter shown on stderr while an object streams to stdout.
#[derive(Debug)]
pub struct ProgressTracker {
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// The length stays unknown until the first chunk reveals the object
    /// size, see [`ProgressTracker::set_total`].
    pub fn new(quiet: bool) -> Arc<Self> {
        let bar = if quiet {
            None
        } else {
            let pb = ProgressBar::no_length();
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        };

        Arc::new(Self { bar })
    }

    pub fn set_total(&self, total_bytes: u64) {
        if let Some(ref bar) = self.bar {
            bar.set_length(total_bytes);
        }
    }

    pub fn increment(&self, bytes: u64) {
        if let Some(ref bar) = self.bar {
            bar.inc(bytes);
        }
    }

    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_with_message("Download complete");
        }
    }

    pub fn abandon(&self) {
        if let Some(ref bar) = self.bar {
            bar.abandon();
        }
    }
}
