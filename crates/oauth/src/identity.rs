//! Caller identity resolution.
//!
//! Tool calls arrive with whatever headers the MCP client (or a fronting proxy) sends. Which of
//! them identifies the user is a deployment decision, so resolution is pluggable:
//! - [`OidcIdentity`]: `Authorization: Bearer <jwt>` validated against an issuer's JWKS
//! - [`HeaderIdentity`]: a header set by a trusted authenticating proxy
//! - [`AnonymousIdentity`]: nobody is identified; every call gets a fresh linking prompt

use crate::error::IdentityError;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when the request carries no identity at all.
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, IdentityError>;
}

/// Nobody is identified.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

#[async_trait]
impl IdentityResolver for AnonymousIdentity {
    async fn resolve(&self, _headers: &HeaderMap) -> Result<Option<String>, IdentityError> {
        Ok(None)
    }
}

/// Identity taken verbatim from a header. Only safe behind a proxy that sets (and strips) it.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    #[must_use]
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

#[async_trait]
impl IdentityResolver for HeaderIdentity {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, IdentityError> {
        Ok(headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub audiences: Vec<String>,
    /// Discovered from the issuer when `None`.
    pub jwks_uri: Option<String>,
    pub leeway_secs: u64,
    pub jwks_refresh_secs: u64,
}

impl OidcConfig {
    /// 60s clock leeway, JWKS refreshed every 10 minutes.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audiences: Vec::new(),
            jwks_uri: None,
            leeway_secs: 60,
            jwks_refresh_secs: 600,
        }
    }
}

/// RS256 JWT validation against an issuer's JWKS; the user is `sub` (or `oid`).
#[derive(Clone)]
pub struct OidcIdentity {
    inner: Arc<Inner>,
}

struct Inner {
    issuer: String,
    audiences: Vec<String>,
    jwks_uri: String,
    leeway_secs: u64,
    refresh_after: Duration,
    http: reqwest::Client,
    jwks: RwLock<JwksCache>,
}

#[derive(Clone, Default)]
struct JwksCache {
    next_refresh_after: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
    keys_by_kid: HashMap<String, DecodingKey>,
}

impl OidcIdentity {
    /// Build a resolver, discovering the JWKS URI when it is not configured.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or yields a non-https JWKS URI.
    pub async fn connect(http: reqwest::Client, cfg: OidcConfig) -> Result<Self, IdentityError> {
        let jwks_uri = match cfg.jwks_uri.clone() {
            Some(v) => {
                if !v.starts_with("https://") {
                    tracing::warn!(
                        jwks_uri = %v,
                        "OIDC JWKS URI is not https; this should only be used for local development"
                    );
                }
                v
            }
            None => discover_jwks_uri(&http, &cfg.issuer).await?,
        };
        Ok(Self::new(http, cfg, jwks_uri))
    }

    #[must_use]
    pub fn new(http: reqwest::Client, cfg: OidcConfig, jwks_uri: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                issuer: cfg.issuer,
                audiences: cfg.audiences,
                jwks_uri,
                leeway_secs: cfg.leeway_secs,
                refresh_after: Duration::from_secs(cfg.jwks_refresh_secs.max(5)),
                http,
                jwks: RwLock::new(JwksCache::default()),
            }),
        }
    }

    /// Validate a JWT and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed, unsigned, expired or foreign tokens.
    pub async fn validate(&self, jwt: &str) -> Result<serde_json::Value, IdentityError> {
        let header = jsonwebtoken::decode_header(jwt).map_err(invalid)?;
        // `jsonwebtoken::Header` doesn't expose `crit`, so we decode the raw JOSE header.
        if jwt_has_crit_header(jwt)? {
            return Err(IdentityError::InvalidToken("unsupported jwt crit header".to_string()));
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| IdentityError::InvalidToken("missing jwt kid".to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::InvalidToken(
                "unsupported jwt alg (expected RS256)".to_string(),
            ));
        }

        if let Some(key) = self.get_key_if_present(kid).await
            && let Ok(claims) = self.decode_with_key(jwt, &key)
        {
            return Ok(claims);
        }

        self.refresh_jwks_if_needed(Some(kid)).await?;

        let key = self
            .get_key_if_present(kid)
            .await
            .ok_or_else(|| IdentityError::InvalidToken("unknown jwt kid".to_string()))?;

        self.decode_with_key(jwt, &key)
    }

    fn decode_with_key(
        &self,
        jwt: &str,
        key: &DecodingKey,
    ) -> Result<serde_json::Value, IdentityError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.inner.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.inner.issuer.as_str()]);
        if self.inner.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            let aud: Vec<&str> = self.inner.audiences.iter().map(String::as_str).collect();
            validation.set_audience(&aud);
        }

        let data =
            jsonwebtoken::decode::<serde_json::Value>(jwt, key, &validation).map_err(invalid)?;
        Ok(data.claims)
    }

    async fn get_key_if_present(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.inner.jwks.read().await;
        cache.keys_by_kid.get(kid).cloned()
    }

    async fn refresh_jwks_if_needed(&self, maybe_kid: Option<&str>) -> Result<(), IdentityError> {
        let now = Instant::now();
        let needs_refresh = |cache: &JwksCache| -> bool {
            let stale = cache.next_refresh_after.is_none_or(|t| now >= t);
            let missing = maybe_kid.is_some_and(|kid| !cache.keys_by_kid.contains_key(kid));
            stale || missing
        };

        if !needs_refresh(&*self.inner.jwks.read().await) {
            return Ok(());
        }

        let mut cache = self.inner.jwks.write().await;
        if !needs_refresh(&*cache) {
            return Ok(());
        }

        // Avoid tight refresh loops (e.g. attacker sends random kids).
        if let Some(last) = cache.last_refresh_attempt
            && now.duration_since(last) < MIN_REFRESH_INTERVAL
        {
            return Ok(());
        }
        cache.last_refresh_attempt = Some(now);

        let (keys_by_kid, cache_ttl) = fetch_jwks(&self.inner.http, &self.inner.jwks_uri).await?;
        cache.keys_by_kid = keys_by_kid;
        cache.next_refresh_after = Some(now + cache_ttl.unwrap_or(self.inner.refresh_after));
        Ok(())
    }
}

#[async_trait]
impl IdentityResolver for OidcIdentity {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, IdentityError> {
        let Some(jwt) = bearer_token(headers) else {
            return Ok(None);
        };
        let claims = self.validate(jwt).await?;
        let subject = ["sub", "oid"]
            .into_iter()
            .find_map(|k| claims.get(k).and_then(serde_json::Value::as_str))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IdentityError::InvalidToken("token has no subject".to_string()))?;
        Ok(Some(subject.to_string()))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty()).then(|| token.trim())
}

fn invalid(e: jsonwebtoken::errors::Error) -> IdentityError {
    IdentityError::InvalidToken(e.to_string())
}

#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

async fn discover_jwks_uri(http: &reqwest::Client, issuer: &str) -> Result<String, IdentityError> {
    let issuer = issuer.trim_end_matches('/');
    let url = format!("{issuer}/.well-known/openid-configuration");
    let doc: OidcDiscovery = http
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| IdentityError::Discovery(format!("GET {url}: {e}")))?
        .json()
        .await
        .map_err(|e| IdentityError::Discovery(format!("parse {url}: {e}")))?;
    if doc.jwks_uri.trim().is_empty() {
        return Err(IdentityError::Discovery(
            "discovery returned empty jwks_uri".to_string(),
        ));
    }
    // Discovered endpoints must be https; set the JWKS URI explicitly to override.
    let parsed = reqwest::Url::parse(&doc.jwks_uri)
        .map_err(|e| IdentityError::Discovery(format!("parse discovered jwks_uri: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(IdentityError::Discovery(
            "discovery returned non-https jwks_uri".to_string(),
        ));
    }
    Ok(doc.jwks_uri)
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

async fn fetch_jwks(
    http: &reqwest::Client,
    jwks_uri: &str,
) -> Result<(HashMap<String, DecodingKey>, Option<Duration>), IdentityError> {
    let resp = http
        .get(jwks_uri)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| IdentityError::Jwks(format!("GET {jwks_uri}: {e}")))?;

    let cache_ttl = parse_cache_control_max_age(resp.headers());
    let jwks: JwksResponse = resp
        .json()
        .await
        .map_err(|e| IdentityError::Jwks(format!("parse jwks json: {e}")))?;

    let mut out: HashMap<String, DecodingKey> = HashMap::new();
    for k in jwks.keys {
        if k.kty != "RSA" {
            continue;
        }
        if let Some(use_) = &k.use_
            && use_ != "sig"
        {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (k.kid, k.n, k.e) else {
            continue;
        };
        let key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| IdentityError::Jwks(format!("build rsa decoding key: {e}")))?;
        out.insert(kid, key);
    }

    if out.is_empty() {
        return Err(IdentityError::Jwks("jwks contains no usable RSA keys".to_string()));
    }
    Ok((out, cache_ttl))
}

fn parse_cache_control_max_age(headers: &HeaderMap) -> Option<Duration> {
    let v = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    v.split(',')
        .map(str::trim)
        .filter_map(|part| part.strip_prefix("max-age="))
        .find_map(|rest| rest.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn jwt_has_crit_header(jwt: &str) -> Result<bool, IdentityError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    let [header_b64, _, _] = parts.as_slice() else {
        return Err(IdentityError::InvalidToken(
            "invalid jwt (expected three parts)".to_string(),
        ));
    };
    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| IdentityError::InvalidToken(format!("base64url decode jwt header: {e}")))?;
    let header: serde_json::Value = serde_json::from_slice(&header_json)
        .map_err(|e| IdentityError::InvalidToken(format!("parse jwt header json: {e}")))?;
    let header = header.as_object().ok_or_else(|| {
        IdentityError::InvalidToken("invalid jwt header (expected JSON object)".to_string())
    })?;
    Ok(header.contains_key("crit"))
}
