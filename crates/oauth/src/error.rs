//! Error types for `anything-oauth`.

use thiserror::Error;

/// Session store failure (backend unavailable, corrupt entry).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("session store error: {0}")]
pub struct StoreError(pub String);

/// Starting an authorization redirect failed.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("authorization is not configured (missing authorize or token URL)")]
    NotConfigured,
    #[error("invalid authorization URL '{url}': {message}")]
    InvalidAuthorizeUrl { url: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handling the provider's redirect back to `/oauth/callback` failed.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Unknown, expired or already-consumed state token.
    #[error("invalid state")]
    InvalidState,
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("authorization is not configured (missing authorize or token URL)")]
    NotConfigured,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// No usable access token for a user.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("account not linked")]
    NotLinked,
    #[error("access token expired and no refresh token is available")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller identity could not be established from the request.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),
    #[error("jwks error: {0}")]
    Jwks(String),
    #[error("oidc discovery failed: {0}")]
    Discovery(String),
}
