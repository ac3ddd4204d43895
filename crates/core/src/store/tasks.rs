//! Durable deferred-task storage.
//!
//! Tasks survive restarts because they live in the same SQLite file as the
//! cache. A task row is deleted only once its remote effect was acknowledged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use super::connection::CacheDb;
use super::parse_timestamp;
use crate::Error;

/// What a deferred task does once connectivity returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// POST buffered analytics events.
    FlushAnalytics,
    /// POST the local cart snapshot.
    SyncCart,
    /// POST an arbitrary JSON payload to an explicit endpoint.
    Generic,
}

impl TaskKind {
    /// Drain order.
    pub const ALL: [TaskKind; 3] = [TaskKind::FlushAnalytics, TaskKind::SyncCart, TaskKind::Generic];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::FlushAnalytics => "flush-analytics",
            TaskKind::SyncCart => "sync-cart",
            TaskKind::Generic => "generic",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flush-analytics" => Ok(TaskKind::FlushAnalytics),
            "sync-cart" => Ok(TaskKind::SyncCart),
            "generic" => Ok(TaskKind::Generic),
            other => Err(Error::InvalidInput(format!("unknown task kind: {other}"))),
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredTask {
    pub id: i64,
    pub kind: TaskKind,
    /// Target override; required for `Generic` tasks.
    pub endpoint: Option<String>,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

type TaskRow = (i64, String, Option<String>, String, String, i64, Option<String>);

fn decode(row: TaskRow) -> Result<DeferredTask, Error> {
    let (id, kind, endpoint, payload, enqueued_at, attempts, last_error) = row;
    Ok(DeferredTask {
        id,
        kind: kind.parse()?,
        endpoint,
        payload: serde_json::from_str(&payload).map_err(|e| Error::CorruptEntry(format!("payload: {e}")))?,
        enqueued_at: parse_timestamp("enqueued_at", &enqueued_at)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error,
    })
}

impl CacheDb {
    /// Append a task to the queue. Returns its id.
    pub async fn enqueue_task(
        &self, kind: TaskKind, endpoint: Option<&str>, payload: &serde_json::Value,
    ) -> Result<i64, Error> {
        let kind = kind.as_str();
        let endpoint = endpoint.map(str::to_string);
        let payload = serde_json::to_string(payload)?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO deferred_tasks (kind, endpoint, payload, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
                    params![kind, endpoint, payload, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// Pending tasks of one kind, in enqueue order.
    pub async fn pending_tasks(&self, kind: TaskKind) -> Result<Vec<DeferredTask>, Error> {
        let kind = kind.as_str();
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<TaskRow>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, endpoint, payload, enqueued_at, attempts, last_error
                     FROM deferred_tasks WHERE kind = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![kind], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(decode).collect()
    }

    /// Remove an acknowledged task.
    pub async fn complete_task(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM deferred_tasks WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Note a failed delivery attempt; the task stays queued.
    pub async fn record_task_failure(&self, id: i64, error: &str) -> Result<(), Error> {
        let error = error.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE deferred_tasks SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
                    params![id, error],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of tasks still waiting, across all kinds.
    pub async fn pending_task_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM deferred_tasks", [], |row| row.get(0))?;
                Ok(u64::try_from(count).unwrap_or_default())
            })
            .await
            .map_err(Error::from)
    }
}
