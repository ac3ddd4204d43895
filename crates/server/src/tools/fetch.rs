//! fetch tool implementation.
//!
//! Delivers an intercepted request to the engine. Relative URLs resolve
//! against the configured origin.

use std::collections::BTreeMap;

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waystation_client::resolve;
use waystation_core::{Destination, Error, Method, Request};
use waystation_engine::Engine;

use super::json_result;

/// Input parameters for the fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchParams {
    /// Absolute URL, or a path relative to the origin.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Fetch destination: document, image, font, script, style, manifest.
    #[serde(default)]
    pub destination: Option<Destination>,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body, sent as-is.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for the fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchOutput {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub async fn fetch_impl(engine: &Engine, params: FetchParams) -> Result<CallToolResult, McpError> {
    let url = resolve(engine.origin(), &params.url).map_err(Error::from)?;
    let method: Method = params.method.parse()?;

    let mut request = Request::get(url).with_destination(params.destination.unwrap_or_default());
    request.method = method;
    for (name, value) in params.headers {
        request = request.with_header(&name, value);
    }
    request.body = params.body.map(Into::into);

    let response = engine.on_fetch(&request).await?;

    let output = FetchOutput { status: response.status, body: response.text(), headers: response.headers };
    json_result(&output)
}
