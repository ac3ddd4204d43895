//! push and notification_click tool implementations.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use waystation_engine::{Engine, Notification};

use super::json_result;

/// Input parameters for the push tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushParams {
    /// Raw push data, normally `{"title": ..., "body": ..., "url": ...}`.
    /// Absent data or data that does not parse is dropped.
    #[serde(default)]
    pub data: Option<String>,
}

pub async fn push_impl(engine: &Engine, params: PushParams) -> Result<CallToolResult, McpError> {
    let notification = engine.on_push(params.data.as_deref().map(str::as_bytes)).await?;
    json_result(&json!({ "notification": notification }))
}

/// Input parameters for the notification_click tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationClickParams {
    /// The notification as returned by the push tool.
    pub notification: Notification,

    /// Action button that was clicked ("open" or "dismiss"); absent for a
    /// click on the notification body.
    #[serde(default)]
    pub action: Option<String>,
}

pub async fn notification_click_impl(
    engine: &Engine, params: NotificationClickParams,
) -> Result<CallToolResult, McpError> {
    let outcome = engine.on_notification_click(&params.notification, params.action.as_deref()).await?;
    json_result(&outcome)
}
