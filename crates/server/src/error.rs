//! Error types for `anything-server`.

use serde_json::Value;
use thiserror::Error;

/// Arguments rejected before dispatch. Surfaced to MCP clients as `invalid_params`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ArgumentError {
    pub message: String,
    /// `{"type": "validation-errors", "violations": [...]}`
    pub data: Value,
}

/// Outcome of an outbound API call that did not produce a usable response.
///
/// Never returned to MCP clients as a protocol error; the dispatcher turns each variant into
/// tool-result content.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The API answered `401`: the stored credential is no longer accepted.
    #[error("upstream rejected the access token")]
    Unauthorized,
    #[error("API Error: {status} - {body}")]
    UpstreamFailure { status: u16, body: String },
    #[error("{0}")]
    NetworkFailure(String),
}

impl From<anything_http_tools::HttpToolsError> for DispatchError {
    fn from(value: anything_http_tools::HttpToolsError) -> Self {
        Self::NetworkFailure(value.to_string())
    }
}
