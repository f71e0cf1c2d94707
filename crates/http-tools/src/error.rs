//! Error types for `anything-http-tools`.

use crate::safety::sanitize_reqwest_error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    /// The outbound safety policy refused the destination.
    #[error("outbound HTTP blocked: {0}")]
    Blocked(String),
    /// DNS resolution for a policy check failed.
    #[error("dns lookup failed: {0}")]
    Dns(String),
    /// Connect/timeout/IO failures talking to the remote side.
    #[error("http transport error: {0}")]
    Transport(String),
    /// Response body exceeded the configured limit.
    #[error("response too large: {0}")]
    TooLarge(String),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}
