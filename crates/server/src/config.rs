//! Command line, environment and YAML configuration.
//!
//! Every operator-facing flag has an `MCP_ANYTHING_*` environment fallback. `serve` additionally
//! reads `--config <file.yaml>` (camelCase keys); values given on the command line or in the
//! environment win over the file.

use crate::telemetry::LogFormat;
use anything_http_tools::safety::OutboundHttpSafety;
use anything_oauth::{OidcConfig, SessionTtls};
use anything_openapi_tools::loader::HashPolicy;
use anyhow::Context as _;
use axum::http::HeaderName;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDENTITY_HEADER: &str = "x-mcp-user-id";

#[derive(Debug, Parser)]
#[command(name = "mcp-anything")]
#[command(about = "Serve any OpenAPI description as an MCP server with OAuth account linking")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "MCP_ANYTHING_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[arg(
        long,
        env = "MCP_ANYTHING_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text,
        global = true
    )]
    pub log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile an OpenAPI description into a catalog file
    Compile(CompileArgs),
    /// Serve a catalog (or an OpenAPI description) over MCP streamable HTTP
    Serve(ServeArgs),
    /// Compile a description and publish the catalog with its runtime environment
    Deploy(DeployArgs),
}

/// Where the description comes from and how its authorization is configured.
#[derive(Debug, Clone, Default, Args)]
pub struct SourceArgs {
    /// OpenAPI 3 description: file path or http(s) URL
    #[arg(long, env = "MCP_ANYTHING_OPENAPI")]
    pub openapi: Option<String>,

    /// Server name (defaults to the description's title)
    #[arg(long, env = "MCP_ANYTHING_NAME")]
    pub name: Option<String>,

    /// API base URL (defaults to the description's first server)
    #[arg(long, env = "MCP_ANYTHING_BASE_URL")]
    pub base_url: Option<String>,

    /// OAuth issuer for `.well-known` endpoint discovery
    #[arg(long, env = "MCP_ANYTHING_OAUTH_ISSUER")]
    pub oauth_issuer: Option<String>,

    /// OAuth authorization URL (overrides discovery and the description)
    #[arg(long, env = "MCP_ANYTHING_AUTH_URL")]
    pub auth_url: Option<String>,

    /// OAuth token URL (overrides discovery and the description)
    #[arg(long, env = "MCP_ANYTHING_TOKEN_URL")]
    pub token_url: Option<String>,

    /// OAuth scopes to request (repeat or comma-separate)
    #[arg(long = "scope", env = "MCP_ANYTHING_SCOPES", value_delimiter = ',')]
    pub scopes: Vec<String>,

    /// Expected `sha256:<hex>` of the description
    #[arg(long, env = "MCP_ANYTHING_SPEC_HASH")]
    pub spec_hash: Option<String>,

    /// What to do when the description does not match `--spec-hash` (warn|fail|ignore)
    #[arg(long, env = "MCP_ANYTHING_SPEC_HASH_POLICY")]
    pub spec_hash_policy: Option<HashPolicy>,

    /// Timeout for every outbound HTTP call, in seconds [default: 30]
    #[arg(long, env = "MCP_ANYTHING_HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: Option<u64>,
}

/// Outbound request policy for description fetches and tool calls.
#[derive(Debug, Clone, Default, Args)]
pub struct SafetyArgs {
    /// Only call these hosts (repeat or comma-separate)
    #[arg(long = "allowed-host", env = "MCP_ANYTHING_ALLOWED_HOSTS", value_delimiter = ',')]
    pub allowed_hosts: Vec<String>,

    /// Refuse destinations on loopback/private/link-local networks
    #[arg(long, env = "MCP_ANYTHING_BLOCK_PRIVATE_NETWORKS")]
    pub block_private_networks: bool,

    /// Fail responses larger than this many bytes
    #[arg(long, env = "MCP_ANYTHING_MAX_RESPONSE_BYTES")]
    pub max_response_bytes: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CompileArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub safety: SafetyArgs,

    /// Write the catalog here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Fail when any operation compiled with warnings
    #[arg(long)]
    pub deny_warnings: bool,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// YAML config file (camelCase keys)
    #[arg(long, env = "MCP_ANYTHING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve a compiled catalog instead of compiling `--openapi` at startup
    #[arg(long, env = "MCP_ANYTHING_CATALOG")]
    pub catalog: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub safety: SafetyArgs,

    /// Listen address [default: 127.0.0.1:8787]
    #[arg(long, env = "MCP_ANYTHING_BIND")]
    pub bind: Option<SocketAddr>,

    /// Externally visible origin (used for OAuth redirects and linking URLs)
    #[arg(long, env = "MCP_ANYTHING_PUBLIC_URL")]
    pub public_url: Option<String>,

    #[arg(long, env = "MCP_ANYTHING_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "MCP_ANYTHING_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// How callers are identified
    #[arg(long, env = "MCP_ANYTHING_IDENTITY", value_enum)]
    pub identity: Option<IdentityMode>,

    /// Header carrying the user id for `--identity header` [default: x-mcp-user-id]
    #[arg(long, env = "MCP_ANYTHING_IDENTITY_HEADER")]
    pub identity_header: Option<String>,

    /// Issuer whose JWTs identify callers for `--identity oidc`
    #[arg(long, env = "MCP_ANYTHING_OIDC_ISSUER")]
    pub oidc_issuer: Option<String>,

    /// Accepted JWT audiences (repeat or comma-separate)
    #[arg(long = "oidc-audience", env = "MCP_ANYTHING_OIDC_AUDIENCES", value_delimiter = ',')]
    pub oidc_audiences: Vec<String>,

    /// Lifetime of a pending authorization, in seconds [default: 3600]
    #[arg(long, env = "MCP_ANYTHING_PENDING_TTL_SECS")]
    pub pending_ttl_secs: Option<u64>,

    /// Lifetime of a linked session, in seconds [default: 30 days]
    #[arg(long, env = "MCP_ANYTHING_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub safety: SafetyArgs,

    #[arg(long, env = "MCP_ANYTHING_CLIENT_ID")]
    pub client_id: String,

    #[arg(long, env = "MCP_ANYTHING_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Directory deployments are published into
    #[arg(long, env = "MCP_ANYTHING_DEPLOY_DIR", default_value = "deployments")]
    pub out_dir: PathBuf,

    /// Origin the deployment will be served from
    #[arg(long, env = "MCP_ANYTHING_PUBLIC_URL")]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Nobody is identified; every tool call gets a fresh linking prompt
    #[default]
    None,
    /// Trust a header set by an authenticating proxy
    Header,
    /// Validate `Authorization: Bearer <jwt>` against an OIDC issuer
    Oidc,
}

// ---------------------------------------------------------------------------------------------
// File config
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub openapi: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub bind: Option<SocketAddr>,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub spec_hash: Option<String>,
    #[serde(default)]
    pub spec_hash_policy: Option<HashPolicy>,
    #[serde(default)]
    pub oauth: OAuthFileConfig,
    #[serde(default)]
    pub identity: IdentityFileConfig,
    #[serde(default)]
    pub sessions: SessionsFileConfig,
    #[serde(default)]
    pub outbound: OutboundFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OAuthFileConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdentityFileConfig {
    #[serde(default)]
    pub mode: Option<IdentityMode>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audiences: Option<Vec<String>>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionsFileConfig {
    #[serde(default)]
    pub pending_ttl_secs: Option<u64>,
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundFileConfig {
    #[serde(default)]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default)]
    pub block_private_networks: Option<bool>,
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
}

impl FileConfig {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid config document.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
    }
}

// ---------------------------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub openapi: Option<String>,
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub oauth_issuer: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    /// `None` when no scopes were given explicitly.
    pub scopes: Option<Vec<String>>,
    pub spec_hash: Option<String>,
    pub hash_policy: HashPolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum IdentitySettings {
    Anonymous,
    Header(HeaderName),
    Oidc(OidcConfig),
}

#[derive(Debug, Clone)]
pub struct ServeSettings {
    pub catalog: Option<PathBuf>,
    pub source: SourceSettings,
    pub safety: OutboundHttpSafety,
    pub bind: SocketAddr,
    pub public_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub identity: IdentitySettings,
    pub ttls: SessionTtls,
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    let v: Vec<String> = v
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!v.is_empty()).then_some(v)
}

impl SourceArgs {
    /// Merge with file values; arguments win.
    #[must_use]
    pub fn resolve(self, file: &FileConfig) -> SourceSettings {
        SourceSettings {
            openapi: self.openapi.or_else(|| file.openapi.clone()),
            name: self.name.or_else(|| file.name.clone()),
            base_url: self.base_url.or_else(|| file.base_url.clone()),
            oauth_issuer: self.oauth_issuer.or_else(|| file.oauth.issuer.clone()),
            auth_url: self.auth_url.or_else(|| file.oauth.authorize_url.clone()),
            token_url: self.token_url.or_else(|| file.oauth.token_url.clone()),
            scopes: non_empty(self.scopes).or_else(|| file.oauth.scopes.clone()),
            spec_hash: self.spec_hash.or_else(|| file.spec_hash.clone()),
            hash_policy: self
                .spec_hash_policy
                .or(file.spec_hash_policy)
                .unwrap_or_default(),
            timeout: Duration::from_secs(
                self.http_timeout_secs
                    .or(file.http_timeout_secs)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        }
    }
}

impl SafetyArgs {
    #[must_use]
    pub fn resolve(self, file: &OutboundFileConfig) -> OutboundHttpSafety {
        let allowed_hosts = non_empty(self.allowed_hosts)
            .or_else(|| file.allowed_hosts.clone())
            .map(|hosts| {
                hosts
                    .into_iter()
                    .map(|h| h.to_ascii_lowercase())
                    .collect::<HashSet<_>>()
            });
        let block_private =
            self.block_private_networks || file.block_private_networks.unwrap_or(false);

        OutboundHttpSafety {
            allowed_hosts,
            allow_private_networks: !block_private,
            max_response_bytes: self.max_response_bytes.or(file.max_response_bytes),
            ..OutboundHttpSafety::default()
        }
    }
}

impl ServeArgs {
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, neither a catalog nor a description
    /// is configured, or the identity settings are incomplete.
    pub fn resolve(self) -> anyhow::Result<ServeSettings> {
        let file = match &self.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };

        let catalog = self.catalog.or_else(|| file.catalog.clone());
        let source = self.source.resolve(&file);
        anyhow::ensure!(
            catalog.is_some() || source.openapi.is_some(),
            "nothing to serve: pass --catalog or --openapi (or set them in --config)"
        );

        let identity_mode = self
            .identity
            .or(file.identity.mode)
            .unwrap_or_default();
        let identity = match identity_mode {
            IdentityMode::None => IdentitySettings::Anonymous,
            IdentityMode::Header => {
                let name = self
                    .identity_header
                    .or_else(|| file.identity.header.clone())
                    .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_string());
                let header = HeaderName::try_from(name.to_ascii_lowercase())
                    .with_context(|| format!("invalid identity header name '{name}'"))?;
                IdentitySettings::Header(header)
            }
            IdentityMode::Oidc => {
                let issuer = self
                    .oidc_issuer
                    .or_else(|| file.identity.issuer.clone())
                    .context("--identity oidc requires --oidc-issuer")?;
                let mut oidc = OidcConfig::new(issuer);
                oidc.audiences = non_empty(self.oidc_audiences)
                    .or_else(|| file.identity.audiences.clone())
                    .unwrap_or_default();
                oidc.jwks_uri = file.identity.jwks_uri.clone();
                IdentitySettings::Oidc(oidc)
            }
        };

        let defaults = SessionTtls::default();
        let ttls = SessionTtls {
            pending: self
                .pending_ttl_secs
                .or(file.sessions.pending_ttl_secs)
                .map_or(defaults.pending, Duration::from_secs),
            session: self
                .session_ttl_secs
                .or(file.sessions.session_ttl_secs)
                .map_or(defaults.session, Duration::from_secs),
        };

        let bind = match self.bind.or(file.bind) {
            Some(addr) => addr,
            None => DEFAULT_BIND.parse().context("default bind address")?,
        };

        Ok(ServeSettings {
            catalog,
            source,
            safety: self.safety.resolve(&file.outbound),
            bind,
            public_url: self.public_url.or_else(|| file.public_url.clone()),
            client_id: self.client_id.or_else(|| file.oauth.client_id.clone()),
            client_secret: self.client_secret.or_else(|| file.oauth.client_secret.clone()),
            identity,
            ttls,
        })
    }
}
