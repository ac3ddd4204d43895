//! control tool implementation.
//!
//! Posts a control message over the engine's control channel and returns the
//! reply, or `{}` for commands that do not answer.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use serde_json::json;
use waystation_engine::{Command, ControlClient, ControlMessage};

use super::json_result;

pub async fn control_impl(control: &ControlClient, message: ControlMessage) -> Result<CallToolResult, McpError> {
    let command = Command::from(message);
    tracing::debug!(?command, "control message");

    match control.request(command).await? {
        Some(reply) => json_result(&reply),
        None => json_result(&json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{engine, text};
    use waystation_engine::control::channel;

    #[tokio::test]
    async fn test_cache_size_then_clear() {
        let (engine, _) = engine().await;
        let (client, _task) = channel(engine, 4);

        let size = control_impl(&client, ControlMessage::parse(r#"{"action":"GET_CACHE_SIZE"}"#).unwrap())
            .await
            .unwrap();
        assert!(text(&size)["size"].as_u64().unwrap() > 0);

        let cleared = control_impl(&client, ControlMessage::parse(r#"{"action":"CLEAR_CACHE"}"#).unwrap())
            .await
            .unwrap();
        assert_eq!(text(&cleared), json!({"success": true}));
    }

    #[tokio::test]
    async fn test_preload_has_empty_reply() {
        let (engine, _) = engine().await;
        let (client, _task) = channel(engine.clone(), 4);

        let message = ControlMessage::parse(r#"{"action":"PRELOAD_ROUTES","data":{"routes":["/deals"]}}"#).unwrap();
        let result = control_impl(&client, message).await.unwrap();
        assert_eq!(text(&result), json!({}));
        assert_eq!(engine.db().list_entries("test-dynamic-v1").await.unwrap().len(), 1);
    }
}
