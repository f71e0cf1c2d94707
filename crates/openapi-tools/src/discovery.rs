//! Authorization-server metadata discovery.
//!
//! Tries RFC 8414 metadata, then OpenID Connect discovery, then a built-in table for providers
//! that publish neither.

use serde::Deserialize;
use url::Url;

/// Endpoints learned from an issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerMetadata {
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    #[serde(default)]
    scopes_supported: Vec<String>,
    issuer: Option<String>,
}

const WELL_KNOWN: [&str; 2] = [
    ".well-known/oauth-authorization-server",
    ".well-known/openid-configuration",
];

/// Discover authorization endpoints for `issuer`.
///
/// Returns `None` when no document yields both endpoints and no built-in entry matches; the
/// caller then falls back to explicit URLs or the description's security scheme.
pub async fn discover(http: &reqwest::Client, issuer: &str) -> Option<DiscoveredEndpoints> {
    let base = issuer.trim_end_matches('/');

    for suffix in WELL_KNOWN {
        let url = format!("{base}/{suffix}");
        match fetch_metadata(http, &url).await {
            Ok(Some(found)) => {
                tracing::info!(issuer = %base, source = %suffix, "discovered authorization endpoints");
                return Some(found);
            }
            Ok(None) => {
                tracing::debug!(url = %url, "metadata document lacks authorization endpoints");
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "metadata lookup failed");
            }
        }
    }

    let fallback = builtin_endpoints(issuer);
    if fallback.is_none() {
        tracing::warn!(issuer = %base, "could not discover authorization endpoints");
    }
    fallback
}

async fn fetch_metadata(
    http: &reqwest::Client,
    url: &str,
) -> Result<Option<DiscoveredEndpoints>, reqwest::Error> {
    let doc: ServerMetadata = http
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let (Some(authorize_url), Some(token_url)) = (doc.authorization_endpoint, doc.token_endpoint)
    else {
        return Ok(None);
    };
    Ok(Some(DiscoveredEndpoints {
        authorize_url,
        token_url,
        scopes: doc.scopes_supported,
        issuer: doc.issuer,
    }))
}

/// Providers known not to publish discovery metadata.
#[must_use]
pub fn builtin_endpoints(issuer: &str) -> Option<DiscoveredEndpoints> {
    let host = Url::parse(issuer).ok()?.host_str()?.to_ascii_lowercase();
    if host == "github.com" || host.ends_with(".github.com") {
        return Some(DiscoveredEndpoints {
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            scopes: ["repo", "user", "gist", "notifications"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            issuer: Some("https://github.com".to_string()),
        });
    }
    None
}
