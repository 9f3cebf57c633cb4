//! pr-brancher service binary.
//!
//! Standalone HTTP service receiving GitHub pull request webhooks.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pr_brancher::{
    config::{Config, GitTransport},
    credentials::{self, KubeSecretStore, SecretStore},
    git::{GitAuth, GitCli},
    server, ApprovalTracker, BotConfigReader, BranchLifecycle, GitHubClient, SessionRegistry,
};

fn init_tracing() -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("pr_brancher=info".parse()?),
    };

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting pr-brancher...");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        port = config.port,
        work_dir = %config.work_dir.display(),
        transport = ?config.git_transport,
        scheme = ?config.branch_scheme,
        "Configuration loaded"
    );

    let store = match &config.namespace {
        Some(namespace) => match KubeSecretStore::connect(namespace, &config.secret_name).await {
            Ok(store) => {
                info!(namespace = %namespace, secret = %config.secret_name, "Connected to Kubernetes");
                Some(store)
            }
            Err(e) => {
                warn!(error = %e, "Kubernetes unavailable, credentials must come from the environment");
                None
            }
        },
        None => None,
    };

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.work_dir.display()))?;

    let creds = credentials::load(&config, store.as_ref().map(|s| s as &dyn SecretStore))
        .await
        .context("Failed to load credentials")?;

    let auth = match config.git_transport {
        GitTransport::Ssh => creds.ssh_key.clone().map_or(GitAuth::None, GitAuth::SshKey),
        GitTransport::Https => GitAuth::Token(creds.github_token.clone()),
    };
    let registry = Arc::new(SessionRegistry::new(
        config.work_dir.clone(),
        Arc::new(GitCli::new(auth)),
    ));

    let github = Arc::new(
        GitHubClient::new(&creds.github_token)
            .context("Failed to create GitHub client")?
            .with_base_url(config.github_api_url.clone()),
    );

    let lifecycle = BranchLifecycle::new(Arc::clone(&registry), github.clone(), github.clone())
        .with_scheme(config.branch_scheme);
    let tracker = ApprovalTracker::new(registry, github)
        .with_reader(BotConfigReader::new(config.bot_config_file.clone()));

    let state = server::AppState {
        lifecycle: Arc::new(lifecycle),
        tracker: Arc::new(tracker),
        transport: config.git_transport,
        webhook_secret: creds.webhook_secret,
    };

    let app = server::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = config.port, "pr-brancher listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
