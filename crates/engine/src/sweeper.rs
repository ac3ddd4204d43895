//! Eviction Sweeper.
//!
//! Deletes dynamic entries whose capture time is older than the configured
//! maximum age. An entry without a capture time counts as captured at the
//! Unix epoch, so it is always old enough to go.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use waystation_core::Error;

use crate::generations::GenerationHandle;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub evicted: usize,
    pub failed: usize,
}

pub struct EvictionSweeper {
    generation: GenerationHandle,
    max_age: Duration,
}

impl EvictionSweeper {
    pub fn new(generation: GenerationHandle, max_age: Duration) -> Self {
        Self { generation, max_age }
    }

    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    ///
    /// Only listing the generation can fail the sweep; a failed delete is
    /// counted and the sweep moves on.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, Error> {
        let entries = self.generation.entries().await?;
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);

        let mut report = SweepReport { scanned: entries.len(), ..Default::default() };
        for entry in entries {
            let captured = entry.captured_at.unwrap_or(DateTime::UNIX_EPOCH);
            if now.signed_duration_since(captured) <= max_age {
                continue;
            }
            match self.generation.remove(&entry.key_hash).await {
                Ok(_) => report.evicted += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(url = %entry.url, error = %e, "failed to evict entry");
                }
            }
        }

        tracing::debug!(
            generation = self.generation.name(),
            scanned = report.scanned,
            evicted = report.evicted,
            failed = report.failed,
            "eviction sweep finished"
        );
        Ok(report)
    }

    /// Run a sweep every `period`, starting one period from now, until the
    /// returned handle is stopped.
    pub fn spawn(self: Arc<Self>, period: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::warn!(error = %e, "eviction sweep failed");
                        }
                    }
                }
            }
        });
        SweeperHandle { stop: Some(stop_tx), task }
    }
}

/// Running sweeper job.
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the job and wait for a sweep in progress to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "sweeper task ended abnormally");
        }
    }
}
