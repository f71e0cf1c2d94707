//! Shared fixtures for unit tests.

use crate::dispatch::ToolInvocationDispatcher;
use crate::state::AppState;
use anything_http_tools::safety::OutboundHttpSafety;
use anything_oauth::session::session_key;
use anything_oauth::{
    AuthorizationSession, HeaderIdentity, MemorySessionStore, OAuthClientConfig,
    OAuthSessionManager, SessionStore, SessionTtls,
};
use anything_openapi_tools::Catalog;
use axum::http::HeaderName;
use rmcp::model::CallToolResult;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Fixture {
    pub state: Arc<AppState>,
    pub store: Arc<MemorySessionStore>,
}

impl Fixture {
    /// API and provider endpoints that are never reached.
    pub fn offline() -> Self {
        Self::new(
            "http://127.0.0.1:9",
            "https://auth.example/authorize",
            "https://auth.example/token",
        )
    }

    pub fn new(base_url: &str, authorize_url: &str, token_url: &str) -> Self {
        let catalog: Catalog = serde_json::from_value(json!({
            "name": "petstore",
            "baseUrl": base_url,
            "authorization": {
                "authorizeUrl": authorize_url,
                "tokenUrl": token_url,
                "scopes": ["read"]
            },
            "tools": [
                {
                    "name": "get_pet",
                    "description": "Get a pet",
                    "method": "GET",
                    "path": "/pets/{petId}",
                    "inputSchema": {
                        "fields": {"petId": {"in": "path", "type": "string"}},
                        "required": ["petId"]
                    }
                },
                {
                    "name": "delete_pet",
                    "description": "Delete a pet",
                    "method": "DELETE",
                    "path": "/pets/{petId}",
                    "inputSchema": {
                        "fields": {"petId": {"in": "path", "type": "string"}},
                        "required": ["petId"]
                    }
                }
            ]
        }))
        .expect("catalog fixture");

        let store = Arc::new(MemorySessionStore::new());
        let sessions = Arc::new(OAuthSessionManager::new(
            store.clone(),
            OAuthClientConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                authorize_url: catalog.authorization.authorize_url.clone(),
                token_url: catalog.authorization.token_url.clone(),
                scopes: catalog.authorization.scopes.clone(),
            },
            reqwest::Client::new(),
            SessionTtls::default(),
        ));
        let dispatcher = ToolInvocationDispatcher::new(
            sessions,
            reqwest::Client::new(),
            catalog.base_url.clone(),
            OutboundHttpSafety::default(),
        );
        let identity = Arc::new(HeaderIdentity::new(HeaderName::from_static("x-user-id")));
        let state = Arc::new(AppState::new(catalog, dispatcher, identity, None));
        Self { state, store }
    }

    pub async fn link(&self, user: &str, expires_at: Option<i64>) {
        let session = AuthorizationSession {
            access_token: format!("tok-{user}"),
            refresh_token: None,
            expires_at,
        };
        self.store
            .put(
                &session_key(user),
                serde_json::to_string(&session).expect("session json"),
                Duration::from_secs(600),
            )
            .await
            .expect("seed session");
    }
}

pub(crate) fn text_of(result: &CallToolResult) -> String {
    let v = serde_json::to_value(result).expect("serialize result");
    v["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}
