//! MCP surface: two built-in account tools plus one tool per catalog entry.

use crate::state::AppState;
use anything_http_tools::semantics::annotations_for_method;
use anything_oauth::{LinkStatus, link_url};
use anything_openapi_tools::Catalog;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, Implementation, JsonObject,
    ListToolsResult, PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
    ToolAnnotations,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub const LINK_ACCOUNT: &str = "link_account";
pub const CHECK_LINK_STATUS: &str = "check_link_status";

/// Names the catalog compiler must not hand out to generated tools.
pub const BUILTIN_TOOLS: [&str; 2] = [LINK_ACCOUNT, CHECK_LINK_STATUS];

#[derive(Clone)]
pub struct AnythingMcp {
    state: Arc<AppState>,
}

impl AnythingMcp {
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle one `tools/call` with the inbound request's headers.
    ///
    /// # Errors
    ///
    /// `invalid_params` for unknown tools and arguments that fail validation. Everything else,
    /// including upstream failures, is reported inside the returned result.
    pub async fn handle_call(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        headers: &HeaderMap,
    ) -> Result<CallToolResult, ErrorData> {
        let args = arguments.unwrap_or_default();
        let origin = self.state.origin(headers);
        let user_id = self.state.caller(headers).await;
        debug!(tool = %name, identified = user_id.is_some(), "tools/call");

        match name {
            LINK_ACCOUNT => Ok(link_account(&origin, user_id.as_deref())),
            CHECK_LINK_STATUS => Ok(self.check_link_status(user_id.as_deref()).await),
            _ => {
                let tool = self.state.catalog().tool(name).ok_or_else(|| {
                    ErrorData::invalid_params(format!("Unknown tool: {name}"), None)
                })?;
                self.state
                    .dispatcher()
                    .invoke(tool, user_id.as_deref(), &origin, &args)
                    .await
                    .map_err(|e| ErrorData::invalid_params(e.message, Some(e.data)))
            }
        }
    }

    async fn check_link_status(&self, user_id: Option<&str>) -> CallToolResult {
        let Some(user_id) = user_id else {
            return text("No user ID found. Please use link_account first.");
        };
        match self.state.sessions().link_status(user_id).await {
            Ok(LinkStatus::Linked { expires_in_minutes }) => {
                let minutes = expires_in_minutes.map_or_else(|| "unknown".to_string(), |m| m.to_string());
                text(&format!("✅ Account is linked! Token expires in {minutes} minutes."))
            }
            Ok(LinkStatus::NotLinked) => {
                text("❌ Account not linked. Please use link_account to connect.")
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "link status lookup failed");
                CallToolResult::error(vec![Content::text(format!("Error: {e}"))])
            }
        }
    }
}

fn text(s: &str) -> CallToolResult {
    CallToolResult::success(vec![Content::text(s.to_string())])
}

fn link_account(origin: &str, user_id: Option<&str>) -> CallToolResult {
    let url = match user_id {
        Some(id) => link_url(origin, id),
        None => link_url(origin, &uuid::Uuid::new_v4().to_string()),
    };
    text(&format!("To link your account, please visit: {url}"))
}

fn builtin_tool(name: &'static str, description: &'static str) -> Tool {
    let schema = json!({"type": "object", "properties": {}});
    let schema = schema.as_object().cloned().unwrap_or_default();
    let mut tool = Tool::new(name, description, Arc::new(schema));
    tool.annotations = Some(ToolAnnotations {
        title: None,
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(false),
    });
    tool
}

/// Tools advertised by `tools/list`: the built-ins, then the catalog in compile order.
#[must_use]
pub fn advertised_tools(catalog: &Catalog) -> Vec<Tool> {
    let mut tools = vec![
        builtin_tool(LINK_ACCOUNT, "Link your account to use this API"),
        builtin_tool(CHECK_LINK_STATUS, "Check if your account is linked"),
    ];
    tools.extend(catalog.tools.iter().map(|t| {
        let mut tool = Tool::new(
            t.name.clone(),
            t.description.clone(),
            Arc::new(t.input_schema.to_json_schema()),
        );
        tool.annotations = Some(annotations_for_method(t.method));
        tool
    }));
    tools
}

impl ServerHandler for AnythingMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.state.catalog().name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(format!(
                "Tools for the {} API. Calls act on behalf of the user's linked account: if a tool \
                 answers with a link, ask the user to open it (or call {LINK_ACCOUNT}), then retry. \
                 Use {CHECK_LINK_STATUS} to see whether the account is linked.",
                self.state.catalog().name
            )),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.state.tools().to_vec(),
            ..Default::default()
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let headers = context
                .extensions
                .get::<Parts>()
                .map(|parts| parts.headers.clone())
                .unwrap_or_default();
            self.handle_call(&request.name, request.arguments, &headers)
                .await
        }
    }
}
