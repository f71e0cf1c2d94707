//! Per-user authorization-code state machine.
//!
//! ```text
//! Unlinked --initiate--> Pending --callback(valid state, code)--> Linked
//! Linked --expired, refresh token--> Refreshing --ok--> Linked
//!                                               \--err--> Linked (stale token returned)
//! ```
//!
//! The manager keeps no state between calls: every operation reads and writes through the
//! [`SessionStore`], so any number of instances may share one store.

use crate::error::{AuthorizeError, CallbackError, CredentialError, StoreError};
use crate::session::{
    AccessToken, AuthorizationSession, LinkStatus, PendingAuthorization, pending_key, session_key,
};
use crate::store::SessionStore;
use anything_http_tools::safety::sanitize_reqwest_error;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// OAuth client registration and provider endpoints.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub scopes: Vec<String>,
}

impl fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl OAuthClientConfig {
    fn endpoints(&self) -> Option<(&str, &str)> {
        let authorize = self.authorize_url.as_deref().filter(|s| !s.is_empty())?;
        let token = self.token_url.as_deref().filter(|s| !s.is_empty())?;
        Some((authorize, token))
    }
}

/// Store lifetimes of the two record kinds.
#[derive(Debug, Clone, Copy)]
pub struct SessionTtls {
    pub pending: Duration,
    pub session: Duration,
}

impl Default for SessionTtls {
    fn default() -> Self {
        Self {
            pending: Duration::from_secs(3600),
            session: Duration::from_secs(86_400 * 30),
        }
    }
}

/// URL a user opens to start linking: `<origin>/oauth/authorize?user_id=<id>`.
#[must_use]
pub fn link_url(origin: &str, user_id: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("user_id", user_id)
        .finish();
    format!("{}/oauth/authorize?{query}", origin.trim_end_matches('/'))
}

fn callback_url(origin: &str) -> String {
    format!("{}/oauth/callback", origin.trim_end_matches('/'))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
}

impl TokenResponse {
    /// Some providers send `expires_in` as a string.
    fn expires_in_secs(&self) -> Option<i64> {
        match self.expires_in.as_ref()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn into_session(self, prior_refresh: Option<String>) -> AuthorizationSession {
        let expires_at = self
            .expires_in_secs()
            .map(|secs| Utc::now().timestamp_millis() + secs.saturating_mul(1000));
        AuthorizationSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(prior_refresh),
            expires_at,
        }
    }
}

pub struct OAuthSessionManager {
    store: Arc<dyn SessionStore>,
    config: OAuthClientConfig,
    http: reqwest::Client,
    ttls: SessionTtls,
}

impl OAuthSessionManager {
    /// `http` should carry a request timeout; token calls are not otherwise bounded.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        config: OAuthClientConfig,
        http: reqwest::Client,
        ttls: SessionTtls,
    ) -> Self {
        Self {
            store,
            config,
            http,
            ttls,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.endpoints().is_some()
    }

    /// Start linking: persist a pending authorization and build the provider redirect.
    ///
    /// # Errors
    ///
    /// Returns an error if endpoints are not configured, the authorize URL is invalid, or the
    /// store write fails.
    pub async fn initiate(&self, user_id: &str, origin: &str) -> Result<Url, AuthorizeError> {
        let (authorize_url, _) = self.config.endpoints().ok_or(AuthorizeError::NotConfigured)?;
        let mut url =
            Url::parse(authorize_url).map_err(|e| AuthorizeError::InvalidAuthorizeUrl {
                url: authorize_url.to_string(),
                message: e.to_string(),
            })?;

        let state = uuid::Uuid::new_v4().to_string();
        let pending = PendingAuthorization {
            user_id: user_id.to_string(),
        };
        let raw = serde_json::to_string(&pending).map_err(|e| StoreError(e.to_string()))?;
        self.store
            .put(&pending_key(&state), raw, self.ttls.pending)
            .await?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &callback_url(origin))
            .append_pair("response_type", "code")
            .append_pair("state", &state)
            .append_pair("scope", &self.config.scopes.join(" "));

        tracing::info!(user_id = %user_id, "authorization initiated");
        Ok(url)
    }

    /// Complete linking with the provider's `code`.
    ///
    /// The state token is consumed before the exchange, so a replayed callback always fails with
    /// [`CallbackError::InvalidState`] and never exchanges twice.
    ///
    /// # Errors
    ///
    /// See [`CallbackError`].
    pub async fn handle_callback(
        &self,
        state: &str,
        code: &str,
        origin: &str,
    ) -> Result<(), CallbackError> {
        let (_, token_url) = self.config.endpoints().ok_or(CallbackError::NotConfigured)?;

        let raw = self
            .store
            .take(&pending_key(state))
            .await?
            .ok_or(CallbackError::InvalidState)?;
        let pending: PendingAuthorization =
            serde_json::from_str(&raw).map_err(|_| CallbackError::InvalidState)?;

        let redirect_uri = callback_url(origin);
        let tokens = self
            .token_request(
                token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", &redirect_uri),
                ],
            )
            .await
            .map_err(CallbackError::TokenExchangeFailed)?;

        self.save_session(&pending.user_id, &tokens.into_session(None))
            .await?;
        tracing::info!(user_id = %pending.user_id, "account linked");
        Ok(())
    }

    /// Return a usable access token, refreshing once if the stored one has expired.
    ///
    /// A failed refresh returns the stale token; the downstream API's `401` then drives
    /// re-linking.
    ///
    /// # Errors
    ///
    /// [`CredentialError::NotLinked`] without a session, [`CredentialError::Expired`] when the
    /// token has expired and there is no refresh token.
    pub async fn resolve_credential(&self, user_id: &str) -> Result<AccessToken, CredentialError> {
        let session = self
            .load_session(user_id)
            .await?
            .ok_or(CredentialError::NotLinked)?;

        if !session.is_expired(Utc::now()) {
            return Ok(AccessToken::new(session.access_token));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            return Err(CredentialError::Expired);
        };
        let Some((_, token_url)) = self.config.endpoints() else {
            return Ok(AccessToken::new(session.access_token));
        };

        tracing::info!(user_id = %user_id, "access token expired; refreshing");
        let refreshed = self
            .token_request(
                token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", &refresh_token),
                ],
            )
            .await;

        match refreshed {
            Ok(tokens) => {
                let updated = tokens.into_session(Some(refresh_token));
                if let Err(e) = self.save_session(user_id, &updated).await {
                    tracing::warn!(user_id = %user_id, error = %e, "failed to persist refreshed tokens");
                }
                Ok(AccessToken::new(updated.access_token))
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "token refresh failed; using stale token");
                Ok(AccessToken::new(session.access_token))
            }
        }
    }

    /// Report whether `user_id` is linked and for how long the token remains valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn link_status(&self, user_id: &str) -> Result<LinkStatus, StoreError> {
        Ok(match self.load_session(user_id).await? {
            Some(session) => LinkStatus::Linked {
                expires_in_minutes: session.minutes_remaining(Utc::now()),
            },
            None => LinkStatus::NotLinked,
        })
    }

    async fn load_session(&self, user_id: &str) -> Result<Option<AuthorizationSession>, StoreError> {
        let Some(raw) = self.store.get(&session_key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "discarding unreadable session record");
                Ok(None)
            }
        }
    }

    async fn save_session(
        &self,
        user_id: &str,
        session: &AuthorizationSession,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session).map_err(|e| StoreError(e.to_string()))?;
        self.store
            .put(&session_key(user_id), raw, self.ttls.session)
            .await
    }

    async fn token_request(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, String> {
        let resp = self
            .http
            .post(token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| sanitize_reqwest_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("token endpoint returned {}", status.as_u16()));
        }
        resp.json::<TokenResponse>()
            .await
            .map_err(|e| format!("invalid token response: {}", sanitize_reqwest_error(&e)))
    }
}
