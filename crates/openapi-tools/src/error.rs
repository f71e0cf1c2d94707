//! Error types for `anything-openapi-tools`.

use std::fmt;
use thiserror::Error;

/// Main error type for loading and discovery.
///
/// Compilation itself never fails; see [`CompileWarning`].
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// `OpenAPI` errors (invalid locations, hash mismatch, unusable base URL).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    OpenApiSpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to read spec body from '{url}': {message}")]
    OpenApiSpecReadBody { url: String, message: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    OpenApiSpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    OpenApiSpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Outbound HTTP refused or failed.
    #[error("HTTP error: {0}")]
    Http(#[from] anything_http_tools::HttpToolsError),

    /// JSON (catalog artifact) errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;

/// A non-fatal problem found while compiling one operation.
///
/// The operation is still compiled, with the offending piece dropped or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileWarning {
    /// `METHOD /path` of the affected operation, or `components` for document-level issues.
    pub operation: String,
    pub message: String,
}

impl CompileWarning {
    pub(crate) fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}
