//! Shared outbound HTTP helpers.
//!
//! This crate is used by:
//! - `anything-openapi-tools` (method model for compiled tool descriptors)
//! - `anything-oauth` (token endpoint calls)
//! - `anything-server` (tool dispatch)
//!
//! It intentionally contains **no** session or catalog logic.

pub mod body;
pub mod encoding;
pub mod error;
pub mod safety;
pub mod semantics;

pub use error::{HttpToolsError, Result};
pub use semantics::HttpMethod;
