//! Persisted authorization records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store key of a user's linked session.
#[must_use]
pub fn session_key(user_id: &str) -> String {
    format!("tokens_{user_id}")
}

/// Store key of a pending authorization.
#[must_use]
pub fn pending_key(state: &str) -> String {
    format!("oauth_state_{state}")
}

/// Tokens for one linked user. Absence of a record means the user is unlinked.
///
/// Access and refresh token are always written together from the same exchange.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSession {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds; `None` when the provider did not say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AuthorizationSession {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| now.timestamp_millis() > at)
    }

    /// Whole minutes until expiry (rounded, negative once expired).
    #[must_use]
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|at| {
            let ms = at - now.timestamp_millis();
            (ms as f64 / 60_000.0).round() as i64
        })
    }
}

impl fmt::Debug for AuthorizationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The user that started an authorization redirect, keyed by its state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub user_id: String,
}

/// Bearer credential handed to the dispatcher.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// What `check_link_status` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    NotLinked,
    Linked { expires_in_minutes: Option<i64> },
}
