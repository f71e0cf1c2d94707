//! Authorization-code sessions for mcp-anything.
//!
//! - [`store`]: the key-value [`SessionStore`] contract and an in-memory TTL implementation
//! - [`session`]: persisted records (linked sessions, pending authorizations)
//! - [`manager`]: the per-user authorization state machine
//! - [`identity`]: resolving the calling user from inbound request headers

pub mod error;
pub mod identity;
pub mod manager;
pub mod session;
pub mod store;

pub use error::{AuthorizeError, CallbackError, CredentialError, IdentityError, StoreError};
pub use identity::{
    AnonymousIdentity, HeaderIdentity, IdentityResolver, OidcConfig, OidcIdentity,
};
pub use manager::{OAuthClientConfig, OAuthSessionManager, SessionTtls, link_url};
pub use session::{AccessToken, AuthorizationSession, LinkStatus, PendingAuthorization};
pub use store::{MemorySessionStore, SessionStore};
