//! Detached background work.
//!
//! Cache-first refreshes are started and never awaited by the request that
//! triggered them. They run on this set instead of being spawned loose, so the
//! engine can cancel them on shutdown and tests can wait for them.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` without waiting for it. Finished tasks are reaped on the way.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every task spawned so far (and any they spawn) has finished.
    pub async fn wait_idle(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.set.lock().unwrap_or_else(PoisonError::into_inner));
            if pending.is_empty() {
                return;
            }
            while let Some(result) = pending.join_next().await {
                match result {
                    Err(e) if e.is_panic() => tracing::warn!(error = %e, "background task panicked"),
                    _ => {}
                }
            }
        }
    }

    /// Cancel everything still running. Cancelled tasks are reaped by the
    /// next `wait_idle`.
    pub fn abort_all(&self) {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).abort_all();
    }
}
