//! Deferred Task Queue.
//!
//! Work started while offline is written to the store and delivered on the
//! next drain. A drain makes one attempt per task: success removes the task,
//! failure records the attempt and leaves it (and everything queued after it
//! of the same kind) for the next drain.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;
use waystation_client::resolve;
use waystation_core::{AppConfig, CacheDb, DeferredTask, Error, Network, Request, TaskKind};

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    pub remaining: u64,
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
}

pub struct DeferredQueue {
    db: CacheDb,
    network: Arc<dyn Network>,
    origin: Url,
    analytics_endpoint: String,
    cart_sync_endpoint: String,
    draining: Mutex<()>,
}

impl DeferredQueue {
    pub fn new(config: &AppConfig, origin: Url, db: CacheDb, network: Arc<dyn Network>) -> Self {
        Self {
            db,
            network,
            origin,
            analytics_endpoint: config.analytics_endpoint.clone(),
            cart_sync_endpoint: config.cart_sync_endpoint.clone(),
            draining: Mutex::new(()),
        }
    }

    /// Store a task for the next drain. Returns the task id.
    ///
    /// Built-in kinds post to their configured endpoint unless `endpoint`
    /// overrides it; `Generic` tasks must name one.
    pub async fn enqueue(&self, kind: TaskKind, payload: Value, endpoint: Option<&str>) -> Result<i64, Error> {
        if kind == TaskKind::Generic && endpoint.is_none_or(|e| e.trim().is_empty()) {
            return Err(Error::InvalidInput("generic tasks need an endpoint".into()));
        }
        if let Some(endpoint) = endpoint {
            resolve(&self.origin, endpoint)?;
        }

        let id = self.db.enqueue_task(kind, endpoint, &payload).await?;
        tracing::debug!(id, kind = %kind, "task enqueued");
        Ok(id)
    }

    pub async fn flush_analytics(&self, events: Vec<Value>) -> Result<i64, Error> {
        self.enqueue(TaskKind::FlushAnalytics, Value::Array(events), None).await
    }

    pub async fn sync_cart(&self, cart: Value) -> Result<i64, Error> {
        self.enqueue(TaskKind::SyncCart, cart, None).await
    }

    pub async fn pending(&self) -> Result<u64, Error> {
        self.db.pending_task_count().await
    }

    /// Attempt every queued task once, kind by kind.
    pub async fn drain(&self) -> Result<DrainReport, Error> {
        let Ok(_guard) = self.draining.try_lock() else {
            tracing::debug!("drain already running");
            return Ok(DrainReport { skipped: true, ..Default::default() });
        };

        let mut report = DrainReport::default();
        for kind in TaskKind::ALL {
            for task in self.db.pending_tasks(kind).await? {
                match self.deliver(&task).await {
                    Ok(()) => {
                        self.db.complete_task(task.id).await?;
                        report.completed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(id = task.id, kind = %kind, attempts = task.attempts + 1, error = %e, "deferred task failed");
                        self.db.record_task_failure(task.id, &e.to_string()).await?;
                        report.failed += 1;
                        break;
                    }
                }
            }
        }

        report.remaining = self.db.pending_task_count().await?;
        tracing::info!(completed = report.completed, failed = report.failed, remaining = report.remaining, "drain finished");
        Ok(report)
    }

    fn endpoint_for<'a>(&'a self, task: &'a DeferredTask) -> &'a str {
        if let Some(endpoint) = task.endpoint.as_deref() {
            return endpoint;
        }
        match task.kind {
            TaskKind::FlushAnalytics => &self.analytics_endpoint,
            TaskKind::SyncCart => &self.cart_sync_endpoint,
            TaskKind::Generic => "",
        }
    }

    async fn deliver(&self, task: &DeferredTask) -> Result<(), Error> {
        if task.kind == TaskKind::FlushAnalytics && task.payload.as_array().is_some_and(Vec::is_empty) {
            return Ok(());
        }

        let url = resolve(&self.origin, self.endpoint_for(task))?;
        let request = Request::post_json(url, &task.payload)?;
        let response = self.network.fetch(&request).await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(Error::TaskFailed(format!("{} answered {}", request.url, response.status)))
        }
    }
}
