use crate::compile::{apply_authorization_overrides, build_catalog};
use crate::config::{Cli, Command, CompileArgs, DeployArgs, FileConfig, IdentitySettings, ServeArgs};
use crate::dispatch::ToolInvocationDispatcher;
use crate::publish::{DirectoryPublisher, Publisher as _};
use crate::routes;
use crate::state::AppState;
use anything_oauth::{
    AnonymousIdentity, HeaderIdentity, IdentityResolver, MemorySessionStore, OAuthClientConfig,
    OAuthSessionManager, OidcIdentity,
};
use anything_openapi_tools::Catalog;
use anyhow::Context as _;
use rmcp::transport::StreamableHttpServerConfig;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Run the selected subcommand.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Compile(args) => compile(args).await,
        Command::Serve(args) => serve(args).await,
        Command::Deploy(args) => deploy(args).await,
    }
}

async fn compile(args: CompileArgs) -> anyhow::Result<()> {
    let file = FileConfig::default();
    let source = args.source.resolve(&file);
    let safety = args.safety.resolve(&file.outbound);

    let built = build_catalog(&source, &safety).await?;
    if args.deny_warnings && !built.warnings.is_empty() {
        anyhow::bail!(
            "{} operation(s) compiled with warnings (first: {})",
            built.warnings.len(),
            built.warnings[0]
        );
    }

    let json = built.catalog.to_json_pretty()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("write catalog to {}", path.display()))?;
            info!(path = %path.display(), tools = built.catalog.tools.len(), "catalog written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").context("write catalog to stdout")?;
        }
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let settings = args.resolve()?;

    let mut catalog = match &settings.catalog {
        Some(path) => {
            let catalog = Catalog::read(path)
                .with_context(|| format!("read catalog {}", path.display()))?;
            info!(path = %path.display(), tools = catalog.tools.len(), "loaded catalog");
            catalog
        }
        None => build_catalog(&settings.source, &settings.safety).await?.catalog,
    };
    apply_authorization_overrides(&mut catalog, &settings.source);

    let (client_id, client_secret) = match (&settings.client_id, &settings.client_secret) {
        (Some(id), Some(secret)) => (id.clone(), secret.clone()),
        _ if catalog.authorization.is_configured() => anyhow::bail!(
            "OAuth client credentials are required (--client-id / --client-secret or \
             MCP_ANYTHING_CLIENT_ID / MCP_ANYTHING_CLIENT_SECRET)"
        ),
        _ => (String::new(), String::new()),
    };

    let http = settings.safety.build_client(settings.source.timeout)?;
    let store = Arc::new(MemorySessionStore::new());
    spawn_purge(store.clone());

    let sessions = Arc::new(OAuthSessionManager::new(
        store,
        OAuthClientConfig {
            client_id,
            client_secret,
            authorize_url: catalog.authorization.authorize_url.clone(),
            token_url: catalog.authorization.token_url.clone(),
            scopes: catalog.authorization.scopes.clone(),
        },
        http.clone(),
        settings.ttls,
    ));
    let dispatcher = ToolInvocationDispatcher::new(
        sessions,
        http.clone(),
        catalog.base_url.clone(),
        settings.safety.clone(),
    );

    let identity: Arc<dyn IdentityResolver> = match settings.identity {
        IdentitySettings::Anonymous => {
            warn!(
                "no caller identity configured; every tool call will ask for a fresh account link"
            );
            Arc::new(AnonymousIdentity)
        }
        IdentitySettings::Header(header) => {
            info!(header = %header, "identifying callers by header");
            Arc::new(HeaderIdentity::new(header))
        }
        IdentitySettings::Oidc(cfg) => {
            info!(issuer = %cfg.issuer, "identifying callers by OIDC bearer token");
            Arc::new(
                OidcIdentity::connect(http.clone(), cfg)
                    .await
                    .context("initialise OIDC identity")?,
            )
        }
    };

    let name = catalog.name.clone();
    let tools = catalog.tools.len();
    let state = Arc::new(AppState::new(
        catalog,
        dispatcher,
        identity,
        settings.public_url.clone(),
    ));

    let mcp_config = StreamableHttpServerConfig::default();
    let shutdown = mcp_config.cancellation_token.clone();
    let app = routes::router(state, mcp_config);

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("bind {}", settings.bind))?;
    let addr = listener.local_addr()?;
    info!(server = %name, tools, addr = %addr, "serving MCP on http://{addr}/mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

fn spawn_purge(store: Arc<MemorySessionStore>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PURGE_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            store.purge_expired();
        }
    });
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = token.cancelled() => {},
    }
    info!("shutting down");
    token.cancel();
}

async fn deploy(args: DeployArgs) -> anyhow::Result<()> {
    let file = FileConfig::default();
    let source = args.source.resolve(&file);
    let safety = args.safety.resolve(&file.outbound);

    let catalog = build_catalog(&source, &safety).await?.catalog;
    let artifact = catalog.to_json_pretty()?;

    let mut env = BTreeMap::from([
        ("MCP_ANYTHING_CATALOG".to_string(), "catalog.json".to_string()),
        ("MCP_ANYTHING_CLIENT_ID".to_string(), args.client_id),
        ("MCP_ANYTHING_CLIENT_SECRET".to_string(), args.client_secret),
    ]);
    if let Some(location) = &source.openapi {
        env.insert("MCP_ANYTHING_OPENAPI".to_string(), location.clone());
    }
    if let Some(public_url) = &args.public_url {
        env.insert("MCP_ANYTHING_PUBLIC_URL".to_string(), public_url.clone());
    }

    let publisher = DirectoryPublisher::new(&args.out_dir, args.public_url.clone());
    let published = publisher.publish(&artifact, &catalog.name, &env).await?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "MCP server deployed: {}", published.url)?;
    writeln!(stdout, "Deployment directory: {}", published.location.display())?;
    match &args.public_url {
        Some(origin) => writeln!(
            stdout,
            "Set your OAuth app's redirect URL to: {}/oauth/callback",
            origin.trim_end_matches('/')
        )?,
        None => writeln!(
            stdout,
            "Set your OAuth app's redirect URL to <public origin>/oauth/callback"
        )?,
    }
    writeln!(
        stdout,
        "Run it with: cd {} && set -a && . ./.env && set +a && mcp-anything serve",
        published.location.display()
    )?;
    Ok(())
}
