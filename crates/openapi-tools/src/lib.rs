//! `OpenAPI` -> MCP tool catalog compiler.
//!
//! This crate is used by:
//! - `anything-server` (`compile` produces the catalog artifact, `serve` loads it)
//!
//! It intentionally contains **no** session logic and performs no tool dispatch.

pub mod auth;
pub mod catalog;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod refs;
pub mod schema;

pub use auth::{AuthorizationConfig, AuthorizationOverrides, extract_authorization};
pub use catalog::{Catalog, CompileReport, ToolCatalogCompiler, ToolDescriptor, derive_tool_name};
pub use error::{CompileWarning, OpenApiToolsError, Result};
pub use schema::{InputField, InputSchema, ParamDescriptor, ParamLocation, ParameterSchemaMapper};
