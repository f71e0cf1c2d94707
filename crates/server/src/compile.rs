//! Description → catalog pipeline shared by `compile`, `serve` and `deploy`.

use crate::config::SourceSettings;
use crate::mcp::BUILTIN_TOOLS;
use anything_http_tools::safety::OutboundHttpSafety;
use anything_openapi_tools::discovery::discover;
use anything_openapi_tools::loader::{self, LoadOptions};
use anything_openapi_tools::{
    AuthorizationOverrides, Catalog, CompileWarning, ToolCatalogCompiler, extract_authorization,
};
use anyhow::Context as _;
use tracing::{info, warn};

const FALLBACK_NAME: &str = "mcp-server";

#[derive(Debug)]
pub struct BuiltCatalog {
    pub catalog: Catalog,
    pub warnings: Vec<CompileWarning>,
}

/// Load the description, settle its authorization endpoints and compile every operation.
///
/// # Errors
///
/// Returns an error if no description is configured, it cannot be loaded or parsed, or no API
/// base URL can be determined.
pub async fn build_catalog(
    source: &SourceSettings,
    safety: &OutboundHttpSafety,
) -> anyhow::Result<BuiltCatalog> {
    let location = source
        .openapi
        .as_deref()
        .context("an OpenAPI description is required (--openapi)")?;

    let loaded = loader::load(
        location,
        &LoadOptions {
            spec_hash: source.spec_hash.clone(),
            hash_policy: source.hash_policy,
            safety: safety.clone(),
            timeout: source.timeout,
        },
    )
    .await
    .with_context(|| format!("load OpenAPI description from {location}"))?;

    let discovered = match source.oauth_issuer.as_deref() {
        Some(issuer) if source.auth_url.is_none() || source.token_url.is_none() => {
            let http = safety.build_client(source.timeout)?;
            let found = discover(&http, issuer).await;
            if found.is_none() {
                warn!(issuer = %issuer, "no OAuth endpoints discovered for issuer");
            }
            found
        }
        _ => None,
    };

    let authorization = extract_authorization(
        &loaded.document,
        &AuthorizationOverrides {
            authorize_url: source.auth_url.clone(),
            token_url: source.token_url.clone(),
            scopes: source.scopes.clone(),
            discovered,
        },
    );
    if !authorization.is_configured() {
        warn!("no OAuth authorize/token URL found; tools requiring authorization will fail");
    }

    let report = ToolCatalogCompiler::new()
        .with_reserved_names(BUILTIN_TOOLS)
        .compile(&loaded.document);

    let base_url =
        loader::resolve_base_url(&loaded.document, location, source.base_url.as_deref())?;
    let name = source
        .name
        .clone()
        .or_else(|| loaded.title().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());

    let mut warnings = loaded.warnings;
    warnings.extend(report.warnings);

    info!(
        name = %name,
        base_url = %base_url,
        tools = report.tools.len(),
        warnings = warnings.len(),
        "compiled catalog"
    );

    Ok(BuiltCatalog {
        catalog: Catalog {
            name,
            base_url,
            authorization,
            spec_hash: Some(loaded.spec_hash),
            tools: report.tools,
        },
        warnings,
    })
}

/// Explicit endpoint settings win over what a prebuilt catalog recorded.
pub fn apply_authorization_overrides(catalog: &mut Catalog, source: &SourceSettings) {
    if let Some(url) = &source.auth_url {
        catalog.authorization.authorize_url = Some(url.clone());
    }
    if let Some(url) = &source.token_url {
        catalog.authorization.token_url = Some(url.clone());
    }
    if let Some(scopes) = &source.scopes {
        catalog.authorization.scopes = scopes.clone();
    }
    if let Some(base_url) = &source.base_url {
        catalog.base_url = base_url.trim_end_matches('/').to_string();
    }
}
