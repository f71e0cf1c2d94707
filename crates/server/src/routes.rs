//! HTTP surface: liveness, the two OAuth legs, and the MCP endpoint.

use crate::mcp::AnythingMcp;
use crate::state::AppState;
use anything_oauth::CallbackError;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use rmcp::transport::{
    StreamableHttpServerConfig, StreamableHttpService,
    streamable_http_server::session::local::LocalSessionManager,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub fn router(state: Arc<AppState>, mcp_config: StreamableHttpServerConfig) -> Router {
    let mcp = AnythingMcp::new(state.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp.clone()),
        Arc::new(LocalSessionManager::default()),
        mcp_config,
    );

    Router::new()
        .route("/", get(liveness))
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/callback", get(callback))
        .nest_service("/mcp", mcp_service)
        .with_state(state)
}

async fn liveness(State(state): State<Arc<AppState>>) -> String {
    format!("MCP Server: {}", state.catalog().name)
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    user_id: Option<String>,
}

async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let user_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let origin = state.origin(&headers);

    match state.sessions().initiate(&user_id, &origin).await {
        Ok(url) => {
            info!(user_id = %user_id, "redirecting to authorization server");
            (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response()
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "cannot start authorization");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let (Some(code), Some(pending)) = (
        query.code.filter(|c| !c.is_empty()),
        query.state.filter(|s| !s.is_empty()),
    ) else {
        return (StatusCode::BAD_REQUEST, "Missing code or state").into_response();
    };
    let origin = state.origin(&headers);

    match state.sessions().handle_callback(&pending, &code, &origin).await {
        Ok(()) => Html("Authorization successful! You can close this window.").into_response(),
        Err(CallbackError::InvalidState) => {
            (StatusCode::BAD_REQUEST, "Invalid state").into_response()
        }
        Err(CallbackError::TokenExchangeFailed(reason)) => {
            warn!(error = %reason, "authorization code exchange failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Token exchange failed").into_response()
        }
        Err(e) => {
            warn!(error = %e, "authorization callback failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
