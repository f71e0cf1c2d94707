//! Catalog-wide authorization configuration.

use crate::discovery::DiscoveredEndpoints;
use openapiv3::{OpenAPI, ReferenceOr, SecurityScheme};
use serde::{Deserialize, Serialize};

/// Authorization-code endpoints shared by every tool in a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AuthorizationConfig {
    /// Both endpoints are known, so a linking flow can run.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.authorize_url.as_deref().is_some_and(|s| !s.is_empty())
            && self.token_url.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Operator-supplied values that take precedence over the description.
///
/// Precedence per endpoint: explicit > discovered > the description's `oauth2` scheme.
/// Scopes: explicit > the description's scheme > discovered `scopes_supported`.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationOverrides {
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub discovered: Option<DiscoveredEndpoints>,
}

struct SchemeFlow {
    authorize_url: Option<String>,
    token_url: Option<String>,
    scopes: Vec<String>,
}

/// Extract the catalog's authorization configuration.
///
/// Scans `components.securitySchemes` in declaration order for the first `oauth2` scheme with an
/// `authorizationCode` flow. Finding nothing is not an error: the result is simply unconfigured.
#[must_use]
pub fn extract_authorization(
    spec: &OpenAPI,
    overrides: &AuthorizationOverrides,
) -> AuthorizationConfig {
    let flow = first_authorization_code_flow(spec);
    let discovered = overrides.discovered.as_ref();

    let authorize_url = overrides
        .authorize_url
        .clone()
        .or_else(|| discovered.map(|d| d.authorize_url.clone()))
        .or_else(|| flow.as_ref().and_then(|f| f.authorize_url.clone()));
    let token_url = overrides
        .token_url
        .clone()
        .or_else(|| discovered.map(|d| d.token_url.clone()))
        .or_else(|| flow.as_ref().and_then(|f| f.token_url.clone()));
    let scopes = overrides
        .scopes
        .clone()
        .or_else(|| flow.map(|f| f.scopes))
        .or_else(|| discovered.map(|d| d.scopes.clone()))
        .unwrap_or_default();

    AuthorizationConfig {
        authorize_url,
        token_url,
        scopes,
    }
}

/// Scopes keep their declaration order.
fn first_authorization_code_flow(spec: &OpenAPI) -> Option<SchemeFlow> {
    let components = spec.components.as_ref()?;
    components
        .security_schemes
        .values()
        .find_map(|scheme| match scheme {
            ReferenceOr::Item(SecurityScheme::OAuth2 { flows, .. }) => {
                flows.authorization_code.as_ref()
            }
            _ => None,
        })
        .map(|flow| {
            let text = |s: &str| (!s.is_empty()).then(|| s.to_string());
            SchemeFlow {
                authorize_url: text(&flow.authorization_url),
                token_url: text(&flow.token_url),
                scopes: flow.scopes.keys().cloned().collect(),
            }
        })
}
