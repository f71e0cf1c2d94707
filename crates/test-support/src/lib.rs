//! Shared plumbing for the `mcp-anything` binary tests.
//!
//! The server tests start the real binary on a free port, wait for its liveness route and then
//! talk MCP to it through [`McpStreamableHttpSession`].

use anyhow::Context as _;
use std::net::{Ipv4Addr, TcpListener};
use std::process::Child;
use std::time::{Duration, Instant};

pub mod mcp;

pub use mcp::{McpStreamableHttpSession, tool_call_text};

/// A spawned `mcp-anything` process, killed and reaped when the test lets go of it.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Err(e) = self.0.kill() {
            eprintln!("mcp-anything {} was not running: {e}", self.0.id());
        }
        let _ = self.0.wait();
    }
}

/// A localhost port nothing is listening on right now, for `serve --bind`.
///
/// The listener is closed before returning, so a parallel test can still grab the port.
///
/// # Errors
///
/// Returns an error if no ephemeral port can be bound.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).context("bind an ephemeral localhost port")?;
    Ok(listener.local_addr().context("ephemeral port address")?.port())
}

/// Poll `url` every 100ms until it answers with a 2xx status.
///
/// Connection errors count as "not up yet".
///
/// # Errors
///
/// Returns an error naming the last status or failure once `timeout_dur` has passed.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + timeout_dur;
    loop {
        let last = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => format!("status {}", resp.status()),
            Err(e) => e.to_string(),
        };
        if Instant::now() >= deadline {
            anyhow::bail!("{url} not serving after {timeout_dur:?} ({last})");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
