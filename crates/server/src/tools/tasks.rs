//! enqueue_task, sync and online tool implementations.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waystation_core::TaskKind;
use waystation_engine::{DrainReport, Engine, SYNC_TAG};

use super::json_result;

/// Input parameters for the enqueue_task tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnqueueTaskParams {
    /// flush-analytics, sync-cart or generic.
    pub kind: TaskKind,

    /// JSON body posted when the task is delivered. For flush-analytics this
    /// is the array of buffered events.
    pub payload: Value,

    /// Target URL or origin-relative path. Required for generic tasks.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnqueueTaskOutput {
    pub id: i64,
    pub pending: u64,
}

pub async fn enqueue_task_impl(engine: &Engine, params: EnqueueTaskParams) -> Result<CallToolResult, McpError> {
    let id = engine.enqueue_task(params.kind, params.payload, params.endpoint.as_deref()).await?;
    let pending = engine.queue().pending().await?;
    json_result(&EnqueueTaskOutput { id, pending })
}

/// Input parameters for the sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncParams {
    /// Sync tag (default: "background-sync").
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    SYNC_TAG.into()
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutput {
    pub tag: String,
    /// Absent when the tag does not drain the queue.
    pub drain: Option<DrainReport>,
}

pub async fn sync_impl(engine: &Engine, params: SyncParams) -> Result<CallToolResult, McpError> {
    let drain = engine.on_sync(&params.tag).await?;
    json_result(&SyncOutput { tag: params.tag, drain })
}

/// Connectivity returned: drain the queue regardless of sync tags.
pub async fn online_impl(engine: &Engine) -> Result<CallToolResult, McpError> {
    let drain = engine.on_online().await?;
    json_result(&drain)
}
