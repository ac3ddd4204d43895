//! MCP server handler implementation.
//!
//! Each tool delivers one host event to the engine.

use std::sync::Arc;

use crate::tools::{
    EnqueueTaskParams, FetchParams, NotificationClickParams, PushParams, SyncParams, control_impl,
    enqueue_task_impl, fetch_impl, notification_click_impl, online_impl, push_impl, sync_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use waystation_engine::control::{self, ControlClient};
use waystation_engine::{ControlMessage, Engine};

const CONTROL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct WaystationServer {
    engine: Arc<Engine>,
    control: ControlClient,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl WaystationServer {
    /// Create a handler serving `engine`. Must be called inside a tokio
    /// runtime: it starts the control channel task.
    pub fn new(engine: Arc<Engine>) -> Self {
        let (control, _serving) = control::channel(engine.clone(), CONTROL_CAPACITY);
        Self { engine, control, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Intercept a request. GET requests are answered from the cache or the network according to their route; when neither can answer the response is a 503 with a JSON error body."
    )]
    async fn fetch(&self, params: Parameters<FetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.engine, params.0).await
    }

    #[tool(
        description = "Send a control message: SKIP_WAITING, GET_CACHE_SIZE, CLEAR_CACHE (data.cacheName optional) or PRELOAD_ROUTES (data.routes). Returns the reply, or {} when the command has none."
    )]
    async fn control(&self, params: Parameters<ControlMessage>) -> Result<CallToolResult, McpError> {
        control_impl(&self.control, params.0).await
    }

    #[tool(description = "Queue work to be delivered once connectivity returns: flush-analytics, sync-cart or generic.")]
    async fn enqueue_task(&self, params: Parameters<EnqueueTaskParams>) -> Result<CallToolResult, McpError> {
        enqueue_task_impl(&self.engine, params.0).await
    }

    #[tool(description = "Deliver a sync event. The background-sync tag drains the deferred task queue.")]
    async fn sync(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        sync_impl(&self.engine, params.0).await
    }

    #[tool(description = "Signal that connectivity returned. Drains the deferred task queue and returns the drain report.")]
    async fn online(&self) -> Result<CallToolResult, McpError> {
        online_impl(&self.engine).await
    }

    #[tool(description = "Deliver a push message and return the notification shown, or null when it was dropped.")]
    async fn push(&self, params: Parameters<PushParams>) -> Result<CallToolResult, McpError> {
        push_impl(&self.engine, params.0).await
    }

    #[tool(description = "Click a notification: dismiss closes it, anything else focuses or opens the target window.")]
    async fn notification_click(&self, params: Parameters<NotificationClickParams>) -> Result<CallToolResult, McpError> {
        notification_click_impl(&self.engine, params.0).await
    }
}

impl ServerHandler for WaystationServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "waystation".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
