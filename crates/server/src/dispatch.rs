//! Generic tool dispatch: one compiled [`ToolDescriptor`] + caller arguments -> one outbound
//! HTTP request -> one MCP tool result.
//!
//! Credential and upstream failures are never protocol errors. Linking problems come back as
//! ordinary text (the agent relays the link to the user); upstream and network failures come
//! back as error content. Only malformed arguments are rejected with `invalid_params`.

use crate::error::{ArgumentError, DispatchError};
use anything_http_tools::body::read_body_limited;
use anything_http_tools::encoding::{encode_path_segment, query_pairs, value_to_string};
use anything_http_tools::safety::{OutboundHttpSafety, redact_url, sanitize_reqwest_error};
use anything_oauth::{AccessToken, CredentialError, OAuthSessionManager, link_url};
use anything_openapi_tools::{ParamLocation, ToolDescriptor};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub struct ToolInvocationDispatcher {
    sessions: Arc<OAuthSessionManager>,
    http: reqwest::Client,
    base_url: String,
    safety: OutboundHttpSafety,
}

/// Request pieces derived from the descriptor and the arguments, before any I/O.
#[derive(Debug)]
struct OutboundRequest {
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl ToolInvocationDispatcher {
    /// `http` must carry the outbound timeout; dispatch does not add its own.
    #[must_use]
    pub fn new(
        sessions: Arc<OAuthSessionManager>,
        http: reqwest::Client,
        base_url: impl Into<String>,
        safety: OutboundHttpSafety,
    ) -> Self {
        Self {
            sessions,
            http,
            base_url: base_url.into(),
            safety,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<OAuthSessionManager> {
        &self.sessions
    }

    /// Invoke `tool` for `user_id` with `args`.
    ///
    /// `origin` is the externally visible origin of this server; linking prompts point at
    /// `<origin>/oauth/authorize`.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError`] when `args` do not satisfy the tool's input schema. No
    /// credential lookup or outbound request happens in that case.
    pub async fn invoke(
        &self,
        tool: &ToolDescriptor,
        user_id: Option<&str>,
        origin: &str,
        args: &JsonObject,
    ) -> Result<CallToolResult, ArgumentError> {
        validate_arguments(tool, args)?;

        let token = if tool.requires_authorization {
            match self.authorize(tool, user_id, origin).await {
                Ok(token) => Some(token),
                Err(prompt) => return Ok(prompt),
            }
        } else {
            None
        };

        info!(tool = %tool.name, method = %tool.method, "dispatching tool call");
        Ok(match self.execute(tool, token.as_ref(), args).await {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(DispatchError::Unauthorized) => {
                warn!(tool = %tool.name, "upstream returned 401; prompting re-authentication");
                reauthenticate_prompt(origin, user_id)
            }
            Err(e @ DispatchError::UpstreamFailure { .. }) => {
                warn!(tool = %tool.name, error = %e, "upstream call failed");
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
            Err(DispatchError::NetworkFailure(msg)) => {
                warn!(tool = %tool.name, error = %msg, "outbound request failed");
                CallToolResult::error(vec![Content::text(format!("Error: {msg}"))])
            }
        })
    }

    /// Resolve the bearer token for an authorization-requiring tool, or the result to return
    /// instead of calling the API.
    async fn authorize(
        &self,
        tool: &ToolDescriptor,
        user_id: Option<&str>,
        origin: &str,
    ) -> Result<AccessToken, CallToolResult> {
        if !self.sessions.is_configured() {
            return Err(CallToolResult::error(vec![Content::text(format!(
                "Error: '{}' requires authorization, but no OAuth authorize/token URL is configured for this server",
                tool.name
            ))]));
        }

        let Some(user_id) = user_id else {
            let url = link_url(origin, &uuid::Uuid::new_v4().to_string());
            return Err(CallToolResult::success(vec![Content::text(format!(
                "❌ No user session found. Please use the \"link_account\" tool first, or visit: {url}"
            ))]));
        };

        match self.sessions.resolve_credential(user_id).await {
            Ok(token) => Ok(token),
            Err(CredentialError::NotLinked) => {
                let url = link_url(origin, user_id);
                Err(CallToolResult::success(vec![Content::text(format!(
                    "❌ Account not linked. Please use the \"link_account\" tool, or visit: {url}"
                ))]))
            }
            Err(CredentialError::Expired) => Err(reauthenticate_prompt(origin, Some(user_id))),
            Err(CredentialError::Store(e)) => {
                warn!(user_id = %user_id, error = %e, "session lookup failed");
                Err(CallToolResult::error(vec![Content::text(format!("Error: {e}"))]))
            }
        }
    }

    async fn execute(
        &self,
        tool: &ToolDescriptor,
        token: Option<&AccessToken>,
        args: &JsonObject,
    ) -> Result<String, DispatchError> {
        let outbound = build_request(&self.base_url, tool, args)?;
        self.safety.check_url(&outbound.url).await?;
        debug!(tool = %tool.name, url = %redact_url(&outbound.url), "outbound request");

        let mut request = self
            .http
            .request(tool.method.to_reqwest(), outbound.url)
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token.secret());
        }
        for (name, value) in &outbound.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &outbound.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::NetworkFailure(sanitize_reqwest_error(&e)))?;
        let status = response.status();
        let bytes = read_body_limited(response, self.safety.max_response_bytes).await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(DispatchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(DispatchError::UpstreamFailure {
                status: status.as_u16(),
                body: render_body(&bytes, false),
            });
        }
        Ok(render_body(&bytes, true))
    }
}

fn reauthenticate_prompt(origin: &str, user_id: Option<&str>) -> CallToolResult {
    let url = match user_id {
        Some(id) => link_url(origin, id),
        None => link_url(origin, &uuid::Uuid::new_v4().to_string()),
    };
    CallToolResult::success(vec![Content::text(format!(
        "🔒 Authentication failed. Your token may have expired. Please re-authenticate using the \"link_account\" tool or visit: {url}"
    ))])
}

/// JSON bodies are re-serialized (pretty for results); anything else is passed through as text.
fn render_body(bytes: &[u8], pretty: bool) -> String {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(v) if pretty => serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string()),
        Ok(v) => v.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn build_request(
    base_url: &str,
    tool: &ToolDescriptor,
    args: &JsonObject,
) -> Result<OutboundRequest, DispatchError> {
    let schema = &tool.input_schema;

    let mut path = tool.path.clone();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let mut query: Vec<(String, String)> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut cookies: Vec<String> = Vec::new();
    let mut body_fields = Map::new();

    for (name, value) in args {
        match schema.location_of(name) {
            Some(ParamLocation::Path) => {
                path = path.replace(
                    &format!("{{{name}}}"),
                    &encode_path_segment(&value_to_string(value)),
                );
            }
            Some(ParamLocation::Query) => query.extend(query_pairs(name, value)),
            Some(ParamLocation::Header) if !value.is_null() => {
                headers.push((name.clone(), value_to_string(value)));
            }
            Some(ParamLocation::Cookie) if !value.is_null() => {
                cookies.push(format!("{name}={}", value_to_string(value)));
            }
            Some(ParamLocation::Body) => {
                body_fields.insert(name.clone(), value.clone());
            }
            None if schema.open_body => {
                body_fields.insert(name.clone(), value.clone());
            }
            _ => {}
        }
    }

    if !cookies.is_empty() {
        headers.push(("cookie".to_string(), cookies.join("; ")));
    }

    let raw = format!("{}{path}", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&raw)
        .map_err(|e| DispatchError::NetworkFailure(format!("invalid request URL: {e}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    let body = if tool.method.carries_body() && tool.body_schema.is_some() {
        if tool.flattens_body() {
            Some(Value::Object(body_fields))
        } else {
            body_fields.remove("body")
        }
    } else {
        None
    };

    Ok(OutboundRequest { url, headers, body })
}

/// Check arguments against the tool's advertised input schema.
///
/// Unknown keys (with "did you mean" suggestions), missing required keys and JSON Schema
/// constraint violations are all reported together.
pub fn validate_arguments(tool: &ToolDescriptor, args: &JsonObject) -> Result<(), ArgumentError> {
    let schema = Value::Object(tool.input_schema.to_json_schema());
    let fields = &tool.input_schema.fields;
    let valid_params: Vec<&str> = fields.keys().map(String::as_str).collect();

    let mut violations: Vec<Value> = Vec::new();

    if !tool.input_schema.open_body {
        for k in args.keys() {
            if fields.contains_key(k) {
                continue;
            }
            let suggestions = find_similar_strings(k, &valid_params);
            violations.push(json!({
                "type": "invalid-parameter",
                "parameter": k,
                "suggestions": suggestions,
                "validParameters": valid_params,
            }));
        }
    }

    for r in tool.input_schema.required_names() {
        if !args.contains_key(r) {
            violations.push(json!({
                "type": "missing-required-parameter",
                "parameter": r,
            }));
        }
    }

    let instance = Value::Object(args.clone());
    match jsonschema::validator_for(&schema) {
        Ok(compiled) => {
            for e in compiled.iter_errors(&instance) {
                // Reported above with a nicer shape.
                if matches!(
                    e.kind(),
                    jsonschema::error::ValidationErrorKind::Required { .. }
                ) {
                    continue;
                }
                violations.push(json!({
                    "type": "constraint-violation",
                    "message": e.to_string(),
                    "instancePath": e.instance_path().to_string(),
                }));
            }
        }
        Err(e) => {
            warn!(tool = %tool.name, error = %e, "input schema does not compile; skipping constraint checks");
        }
    }

    if violations.is_empty() {
        return Ok(());
    }

    let message = if let Some(v) = violations
        .iter()
        .find(|v| v.get("type").and_then(Value::as_str) == Some("invalid-parameter"))
    {
        let p = v.get("parameter").and_then(Value::as_str).unwrap_or("?");
        let suggestion = v
            .get("suggestions")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(Value::as_str);
        match suggestion {
            Some(s) => format!("Invalid params: unknown parameter '{p}' (did you mean '{s}'?)"),
            None => format!("Invalid params: unknown parameter '{p}'"),
        }
    } else {
        format!(
            "Invalid params: validation failed with {} error(s)",
            violations.len()
        )
    };

    Err(ArgumentError {
        message,
        data: json!({
            "type": "validation-errors",
            "violations": violations,
        }),
    })
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anything_oauth::session::session_key;
    use anything_oauth::{
        AuthorizationSession, MemorySessionStore, OAuthClientConfig, SessionStore, SessionTtls,
    };
    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::header::LOCATION;
    use axum::http::{HeaderMap, Method, StatusCode as AxumStatus, Uri};
    use axum::response::{IntoResponse as _, Response};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ORIGIN: &str = "http://mcp.local";

    async fn echo(
        State(hits): State<Arc<AtomicUsize>>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> Response {
        hits.fetch_add(1, Ordering::SeqCst);
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let path = uri.path();
        if path.ends_with("/unauthorized") {
            return (AxumStatus::UNAUTHORIZED, Json(json!({"message": "bad token"}))).into_response();
        }
        if path.ends_with("/broken") {
            return (AxumStatus::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})))
                .into_response();
        }
        if path.ends_with("/slow") {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return (AxumStatus::OK, "late").into_response();
        }
        if path.ends_with("/secret") {
            return (AxumStatus::OK, "INTERNAL-SECRET").into_response();
        }
        if path.ends_with("/bounce") {
            // Same listener, different host name.
            let port = header("host")
                .and_then(|h| h.rsplit_once(':').map(|(_, p)| p.to_string()))
                .unwrap_or_default();
            let location = format!("http://localhost:{port}/v1/secret");
            return (AxumStatus::FOUND, [(LOCATION, location)]).into_response();
        }

        let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        (
            AxumStatus::OK,
            Json(json!({
                "method": method.as_str(),
                "path": path,
                "query": uri.query(),
                "authorization": header("authorization"),
                "contentType": header("content-type"),
                "trace": header("x-trace"),
                "cookie": header("cookie"),
                "body": body,
            })),
        )
            .into_response()
    }

    async fn spawn_upstream() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().fallback(echo).with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let addr = listener.local_addr().expect("upstream addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve upstream");
        });
        (format!("http://{addr}/v1"), hits)
    }

    fn manager(store: Arc<MemorySessionStore>, configured: bool) -> Arc<OAuthSessionManager> {
        let (authorize_url, token_url) = if configured {
            (
                Some("https://auth.example/authorize".to_string()),
                Some("https://auth.example/token".to_string()),
            )
        } else {
            (None, None)
        };
        Arc::new(OAuthSessionManager::new(
            store,
            OAuthClientConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                authorize_url,
                token_url,
                scopes: vec!["read".to_string()],
            },
            reqwest::Client::new(),
            SessionTtls::default(),
        ))
    }

    async fn link(store: &MemorySessionStore, user: &str, expires_at: Option<i64>) {
        let session = AuthorizationSession {
            access_token: format!("tok-{user}"),
            refresh_token: None,
            expires_at,
        };
        store
            .put(
                &session_key(user),
                serde_json::to_string(&session).expect("session json"),
                Duration::from_secs(600),
            )
            .await
            .expect("seed session");
    }

    async fn dispatcher_for(base_url: &str) -> (ToolInvocationDispatcher, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        link(&store, "alice", None).await;
        let dispatcher = ToolInvocationDispatcher::new(
            manager(store.clone(), true),
            reqwest::Client::new(),
            base_url,
            OutboundHttpSafety::default(),
        );
        (dispatcher, store)
    }

    fn tool(v: Value) -> ToolDescriptor {
        serde_json::from_value(v).expect("tool descriptor")
    }

    fn get_pet() -> ToolDescriptor {
        tool(json!({
            "name": "get_pet",
            "description": "Get a pet",
            "method": "GET",
            "path": "/pets/{petId}",
            "inputSchema": {
                "fields": {
                    "petId": {"in": "path", "type": "string"},
                    "verbose": {"in": "query", "type": "boolean"},
                    "tags": {"in": "query", "type": "array", "items": {"type": "string"}},
                    "X-Trace": {"in": "header", "type": "string"},
                    "session": {"in": "cookie", "type": "string"}
                },
                "required": ["petId"]
            }
        }))
    }

    fn create_pet() -> ToolDescriptor {
        tool(json!({
            "name": "create_pet",
            "description": "Create a pet",
            "method": "POST",
            "path": "/pets",
            "inputSchema": {
                "fields": {
                    "name": {"in": "body", "type": "string"},
                    "tag": {"in": "body", "type": "string"},
                    "dryRun": {"in": "query", "type": "boolean"}
                },
                "required": ["name"]
            },
            "bodySchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}, "tag": {"type": "string"}},
                "required": ["name"]
            },
            "bodyRequired": true
        }))
    }

    fn fixed_path(name: &str, path: &str) -> ToolDescriptor {
        tool(json!({
            "name": name,
            "description": name,
            "method": "GET",
            "path": path,
            "inputSchema": {"fields": {}}
        }))
    }

    fn args(v: Value) -> JsonObject {
        v.as_object().cloned().expect("object args")
    }

    fn text_of(result: &CallToolResult) -> String {
        let v = serde_json::to_value(result).expect("serialize result");
        v["content"][0]["text"].as_str().unwrap_or_default().to_string()
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error == Some(true)
    }

    #[tokio::test]
    async fn routes_path_query_header_and_cookie_arguments() {
        let (base, _) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let result = dispatcher
            .invoke(
                &get_pet(),
                Some("alice"),
                ORIGIN,
                &args(json!({
                    "petId": "a b/c",
                    "verbose": true,
                    "tags": ["x", "y"],
                    "X-Trace": "t1",
                    "session": "s1"
                })),
            )
            .await
            .expect("valid args");

        assert!(!is_error(&result));
        let echoed: Value = serde_json::from_str(&text_of(&result)).expect("json text");
        assert_eq!(echoed["method"], "GET");
        assert_eq!(echoed["path"], "/v1/pets/a%20b%2Fc");
        let query = echoed["query"].as_str().expect("query");
        assert!(query.contains("verbose=true"));
        assert!(query.contains("tags=x&tags=y"));
        assert_eq!(echoed["authorization"], "Bearer tok-alice");
        assert_eq!(echoed["trace"], "t1");
        assert_eq!(echoed["cookie"], "session=s1");
        assert_eq!(echoed["body"], Value::Null);
    }

    #[tokio::test]
    async fn body_is_synthesized_from_body_fields_only() {
        let (base, _) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let result = dispatcher
            .invoke(
                &create_pet(),
                Some("alice"),
                ORIGIN,
                &args(json!({"name": "rex", "tag": "dog", "dryRun": true})),
            )
            .await
            .expect("valid args");

        let echoed: Value = serde_json::from_str(&text_of(&result)).expect("json text");
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["query"], "dryRun=true");
        assert_eq!(echoed["body"], json!({"name": "rex", "tag": "dog"}));
        assert_eq!(echoed["contentType"], "application/json");
    }

    #[tokio::test]
    async fn missing_required_path_argument_is_rejected_before_any_request() {
        let (base, hits) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let err = dispatcher
            .invoke(&get_pet(), Some("alice"), ORIGIN, &args(json!({"verbose": true})))
            .await
            .expect_err("petId is required");

        assert_eq!(err.message, "Invalid params: validation failed with 1 error(s)");
        assert_eq!(err.data["violations"][0]["type"], "missing-required-parameter");
        assert_eq!(err.data["violations"][0]["parameter"], "petId");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_argument_suggests_the_closest_field() {
        let (base, hits) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let err = dispatcher
            .invoke(&get_pet(), Some("alice"), ORIGIN, &args(json!({"petid": "1"})))
            .await
            .expect_err("unknown parameter");

        assert_eq!(
            err.message,
            "Invalid params: unknown parameter 'petid' (did you mean 'petId'?)"
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn type_mismatch_is_a_constraint_violation() {
        let (base, _) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let err = dispatcher
            .invoke(
                &get_pet(),
                Some("alice"),
                ORIGIN,
                &args(json!({"petId": "1", "verbose": "yes"})),
            )
            .await
            .expect_err("verbose must be boolean");
        assert_eq!(err.data["violations"][0]["type"], "constraint-violation");
        assert_eq!(err.data["violations"][0]["instancePath"], "/verbose");
    }

    #[tokio::test]
    async fn anonymous_caller_gets_link_prompt_without_outbound_call() {
        let (base, hits) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let result = dispatcher
            .invoke(&get_pet(), None, ORIGIN, &args(json!({"petId": "1"})))
            .await
            .expect("valid args");

        assert!(!is_error(&result));
        let text = text_of(&result);
        assert!(text.starts_with("❌ No user session found."), "{text}");
        assert!(text.contains("http://mcp.local/oauth/authorize?user_id="));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unlinked_user_gets_link_prompt_with_their_id() {
        let (base, hits) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let result = dispatcher
            .invoke(&get_pet(), Some("bob"), ORIGIN, &args(json!({"petId": "1"})))
            .await
            .expect("valid args");

        assert!(!is_error(&result));
        assert_eq!(
            text_of(&result),
            "❌ Account not linked. Please use the \"link_account\" tool, or visit: http://mcp.local/oauth/authorize?user_id=bob"
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_prompts_reauthentication() {
        let (base, hits) = spawn_upstream().await;
        let (dispatcher, store) = dispatcher_for(&base).await;
        link(&store, "carol", Some(1)).await;

        let result = dispatcher
            .invoke(&get_pet(), Some("carol"), ORIGIN, &args(json!({"petId": "1"})))
            .await
            .expect("valid args");

        assert!(text_of(&result).starts_with("🔒 Authentication failed."));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_401_yields_link_prompt_regardless_of_body() {
        let (base, hits) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let result = dispatcher
            .invoke(&fixed_path("whoami", "/unauthorized"), Some("alice"), ORIGIN, &JsonObject::new())
            .await
            .expect("valid args");

        assert!(!is_error(&result));
        let text = text_of(&result);
        assert!(text.starts_with("🔒 Authentication failed."), "{text}");
        assert!(text.ends_with("/oauth/authorize?user_id=alice"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_upstream_failures_are_error_content() {
        let (base, _) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;

        let result = dispatcher
            .invoke(&fixed_path("explode", "/broken"), Some("alice"), ORIGIN, &JsonObject::new())
            .await
            .expect("valid args");

        assert!(is_error(&result));
        assert_eq!(text_of(&result), r#"API Error: 500 - {"error":"boom"}"#);
    }

    #[tokio::test]
    async fn public_tools_skip_linking_and_send_no_bearer() {
        let (base, _) = spawn_upstream().await;
        let (dispatcher, _) = dispatcher_for(&base).await;
        let mut public = fixed_path("health", "/health");
        public.requires_authorization = false;

        let result = dispatcher
            .invoke(&public, None, ORIGIN, &JsonObject::new())
            .await
            .expect("valid args");

        let echoed: Value = serde_json::from_str(&text_of(&result)).expect("json text");
        assert_eq!(echoed["authorization"], Value::Null);
    }

    #[tokio::test]
    async fn network_failures_become_error_content() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            l.local_addr().expect("addr").port()
        };
        let (dispatcher, _) = dispatcher_for(&format!("http://127.0.0.1:{port}")).await;

        let result = dispatcher
            .invoke(&get_pet(), Some("alice"), ORIGIN, &args(json!({"petId": "1"})))
            .await
            .expect("valid args");

        assert!(is_error(&result));
        assert!(text_of(&result).starts_with("Error: "));
    }

    #[tokio::test]
    async fn upstream_timeouts_become_error_content() {
        let (base, hits) = spawn_upstream().await;
        let store = Arc::new(MemorySessionStore::new());
        link(&store, "alice", None).await;
        let safety = OutboundHttpSafety::default();
        let http = safety
            .build_client(Duration::from_millis(200))
            .expect("client");
        let dispatcher = ToolInvocationDispatcher::new(manager(store, true), http, base, safety);

        let started = std::time::Instant::now();
        let result = dispatcher
            .invoke(&fixed_path("slow", "/slow"), Some("alice"), ORIGIN, &JsonObject::new())
            .await
            .expect("valid args");

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(is_error(&result));
        let text = text_of(&result);
        assert!(text.starts_with("Error: "), "{text}");
        assert!(text.contains("timed out"), "{text}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirects_off_the_allowlist_are_not_followed() {
        let (base, _) = spawn_upstream().await;
        let store = Arc::new(MemorySessionStore::new());
        link(&store, "alice", None).await;
        let safety = OutboundHttpSafety {
            allowed_hosts: Some(HashSet::from(["127.0.0.1".to_string()])),
            ..OutboundHttpSafety::default()
        };
        let http = safety.build_client(Duration::from_secs(5)).expect("client");
        let dispatcher = ToolInvocationDispatcher::new(manager(store, true), http, base, safety);

        let result = dispatcher
            .invoke(&fixed_path("bounce", "/bounce"), Some("alice"), ORIGIN, &JsonObject::new())
            .await
            .expect("valid args");

        assert!(is_error(&result));
        let text = text_of(&result);
        assert!(!text.contains("INTERNAL-SECRET"), "{text}");
        assert!(text.starts_with("Error: "), "{text}");
    }

    #[tokio::test]
    async fn safety_policy_blocks_disallowed_hosts() {
        let (base, hits) = spawn_upstream().await;
        let store = Arc::new(MemorySessionStore::new());
        link(&store, "alice", None).await;
        let safety = OutboundHttpSafety {
            allowed_hosts: Some(HashSet::from(["api.example.com".to_string()])),
            ..OutboundHttpSafety::default()
        };
        let dispatcher =
            ToolInvocationDispatcher::new(manager(store, true), reqwest::Client::new(), base, safety);

        let result = dispatcher
            .invoke(&get_pet(), Some("alice"), ORIGIN, &args(json!({"petId": "1"})))
            .await
            .expect("valid args");

        assert!(is_error(&result));
        assert!(text_of(&result).contains("not in allowlist"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconfigured_authorization_fails_authorization_requiring_tools() {
        let (base, hits) = spawn_upstream().await;
        let store = Arc::new(MemorySessionStore::new());
        let dispatcher = ToolInvocationDispatcher::new(
            manager(store, false),
            reqwest::Client::new(),
            base,
            OutboundHttpSafety::default(),
        );

        let result = dispatcher
            .invoke(&get_pet(), Some("alice"), ORIGIN, &args(json!({"petId": "1"})))
            .await
            .expect("valid args");

        assert!(is_error(&result));
        assert!(text_of(&result).contains("no OAuth authorize/token URL"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scalar_body_is_sent_as_is() {
        let upload = tool(json!({
            "name": "upload",
            "description": "Upload",
            "method": "PUT",
            "path": "/blobs/{id}",
            "inputSchema": {
                "fields": {
                    "id": {"in": "path", "type": "string"},
                    "body": {"in": "body", "type": "array", "items": {"type": "integer"}}
                },
                "required": ["id"]
            },
            "bodySchema": {"type": "array", "items": {"type": "integer"}}
        }));

        let req = build_request(
            "https://api.example.com/",
            &upload,
            &args(json!({"id": "7", "body": [1, 2]})),
        )
        .expect("request");
        assert_eq!(req.url.as_str(), "https://api.example.com/blobs/7");
        assert_eq!(req.body, Some(json!([1, 2])));
    }

    #[test]
    fn open_bodies_accept_and_forward_undeclared_keys() {
        let mut open = create_pet();
        open.input_schema.open_body = true;

        validate_arguments(&open, &args(json!({"name": "rex", "color": "red"})))
            .expect("open body accepts extra keys");
        let req = build_request(
            "https://api.example.com",
            &open,
            &args(json!({"name": "rex", "color": "red"})),
        )
        .expect("request");
        assert_eq!(req.body, Some(json!({"name": "rex", "color": "red"})));
    }

    #[test]
    fn get_requests_never_carry_a_body() {
        let mut odd = create_pet();
        odd.method = anything_http_tools::HttpMethod::Get;
        let req = build_request("https://api.example.com", &odd, &args(json!({"name": "rex"})))
            .expect("request");
        assert_eq!(req.body, None);
    }
}
