#![allow(dead_code)]

use anyhow::Context as _;
use axum::Router;
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

pub use anything_test_support::{
    KillOnDrop, McpStreamableHttpSession, pick_unused_port, tool_call_text, wait_http_ok,
};

pub const BIN: &str = env!("CARGO_BIN_EXE_mcp-anything");

/// Start `mcp-anything serve` on a free port and wait for its liveness route.
pub async fn spawn_serve(args: &[&str]) -> anyhow::Result<(KillOnDrop, String)> {
    let port = pick_unused_port()?;
    let child: Child = Command::new(BIN)
        .arg("--log-level")
        .arg("info")
        .arg("serve")
        .args(args)
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .spawn()
        .context("spawn mcp-anything serve")?;
    let child = KillOnDrop(child);

    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/"), Duration::from_secs(30)).await?;
    Ok((child, base))
}

/// Run a one-shot subcommand to completion.
pub fn run_cli(args: &[&str]) -> anyhow::Result<Output> {
    Command::new(BIN)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .context("run mcp-anything")
}

/// Serve `app` on an ephemeral localhost port.
pub async fn serve_app(app: Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind mock")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Petstore description whose oauth2 flow points at `provider`.
pub fn petstore_yaml(api_base: &str, provider: &str) -> String {
    format!(
        r"openapi: 3.0.3
info:
  title: Petstore
  version: 1.0.0
servers:
  - url: {api_base}/v1
security:
  - oauth: [pets:read]
components:
  securitySchemes:
    oauth:
      type: oauth2
      flows:
        authorizationCode:
          authorizationUrl: {provider}/authorize
          tokenUrl: {provider}/token
          scopes:
            pets:read: read pets
paths:
  /pets/{{petId}}:
    get:
      operationId: getPet
      summary: Get a pet by id
      parameters:
        - name: petId
          in: path
          required: true
          schema:
            type: integer
  /pets:
    post:
      operationId: createPet
      summary: Create a pet
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties:
                name:
                  type: string
                tag:
                  type: string
  /health:
    get:
      operationId: health
      security: []
"
    )
}
