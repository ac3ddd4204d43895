//! MCP tool implementations.
//!
//! Each tool delivers one host event to the engine and returns the outcome
//! as JSON text.

pub mod control;
pub mod fetch;
pub mod notify;
pub mod tasks;

pub use control::control_impl;
pub use fetch::{FetchParams, fetch_impl};
pub use notify::{NotificationClickParams, PushParams, notification_click_impl, push_impl};
pub use tasks::{EnqueueTaskParams, SyncParams, enqueue_task_impl, online_impl, sync_impl};

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use waystation_core::Error;

/// Wrap `output` as the pretty-printed text content of a successful call.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(Error::from)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
