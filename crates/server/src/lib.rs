//! `mcp-anything`: compile an OpenAPI description into MCP tools and serve them, with per-user
//! OAuth account linking for the calls they make.

pub mod commands;
pub mod compile;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod publish;
pub mod routes;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;
