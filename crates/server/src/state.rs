use crate::dispatch::ToolInvocationDispatcher;
use crate::mcp::advertised_tools;
use anything_oauth::{IdentityResolver, OAuthSessionManager};
use anything_openapi_tools::Catalog;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use rmcp::model::Tool;
use std::sync::Arc;
use tracing::warn;

/// Everything a running server shares between the HTTP routes and the MCP surface.
pub struct AppState {
    catalog: Catalog,
    tools: Vec<Tool>,
    dispatcher: ToolInvocationDispatcher,
    identity: Arc<dyn IdentityResolver>,
    public_url: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(
        catalog: Catalog,
        dispatcher: ToolInvocationDispatcher,
        identity: Arc<dyn IdentityResolver>,
        public_url: Option<String>,
    ) -> Self {
        let tools = advertised_tools(&catalog);
        Self {
            catalog,
            tools,
            dispatcher,
            identity,
            public_url: public_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Built-in tools followed by the catalog tools, as advertised by `tools/list`.
    #[must_use]
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ToolInvocationDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn sessions(&self) -> &OAuthSessionManager {
        self.dispatcher.sessions()
    }

    /// Externally visible origin: `--public-url` when configured, else `http://<Host>`.
    ///
    /// The OAuth redirect URI is derived from this, so both legs of a flow must see the same
    /// value.
    #[must_use]
    pub fn origin(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.public_url {
            return url.clone();
        }
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost");
        format!("http://{host}")
    }

    /// The calling user, if the configured identity resolver recognizes one.
    pub async fn caller(&self, headers: &HeaderMap) -> Option<String> {
        match self.identity.resolve(headers).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "caller identity rejected; treating request as anonymous");
                None
            }
        }
    }
}
