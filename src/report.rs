//! Training progress reporting.
//!
//! [`Network::fit`](crate::network::Network::fit) never prints. It hands
//! batch and epoch events to a [`Reporter`], so callers choose between log
//! lines, a progress bar, or nothing at all.

use log::{debug, info};
use std::time::Duration;

/// Loss and misclassification rate over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluation {
    pub loss: f32,
    pub error_rate: f32,
}

/// Summary of one training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean of the mini-batch losses seen during the epoch.
    pub mean_batch_loss: f32,
    pub train: Evaluation,
    pub validation: Option<Evaluation>,
    pub elapsed: Duration,
}

/// Receives training events.
pub trait Reporter {
    fn on_epoch_start(&mut self, _epoch: usize, _total_batches: usize) {}

    fn on_batch(&mut self, _epoch: usize, _batch: usize, _total_batches: usize, _loss: f32) {}

    fn on_epoch(&mut self, _stats: &EpochStats) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Reports through the `log` facade: one `info!` line per epoch and a
/// `debug!` line every `batch_interval` batches.
#[derive(Debug, Clone, Copy)]
pub struct LogReporter {
    batch_interval: usize,
}

impl LogReporter {
    pub fn new(batch_interval: usize) -> Self {
        Self { batch_interval }
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Reporter for LogReporter {
    fn on_batch(&mut self, epoch: usize, batch: usize, total_batches: usize, loss: f32) {
        if self.batch_interval > 0 && (batch + 1) % self.batch_interval == 0 {
            debug!(
                "epoch {} batch {}/{}: loss {:.6}",
                epoch,
                batch + 1,
                total_batches,
                loss
            );
        }
    }

    fn on_epoch(&mut self, stats: &EpochStats) {
        info!("{}", format_epoch(stats));
    }
}

/// One-line epoch summary shared by the reporters.
pub fn format_epoch(stats: &EpochStats) -> String {
    let mut line = format!(
        "Epoch {}: training loss -> {:.6}, training error -> {:.2}%",
        stats.epoch,
        stats.train.loss,
        stats.train.error_rate * 100.0
    );
    if let Some(valid) = stats.validation {
        line.push_str(&format!(
            ", testing loss -> {:.6}, testing error -> {:.2}%",
            valid.loss,
            valid.error_rate * 100.0
        ));
    }
    line.push_str(&format!(" ({:.2}s)", stats.elapsed.as_secs_f32()));
    line
}
