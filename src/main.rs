use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ci_server::auth::Authenticator;
use ci_server::config::Config;
use ci_server::pipeline::Orchestrator;
use ci_server::store::{AppState, BuildStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("CI_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();
    if cfg.webhook_secret.is_empty() {
        tracing::warn!("CI_WEBHOOK_SECRET is empty, webhook signatures only prove knowledge of an empty key");
    }

    // Build records
    let store = Arc::new(BuildStore::new(&cfg.storage_path));
    store.ensure_dir().await?;
    {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            match store.load_recent().await {
                Ok(count) => tracing::info!(count, "recent builds loaded"),
                Err(e) => tracing::error!(error = %e, "failed to load recent builds"),
            }
        });
    }

    // Shared HTTP client for the status API and diff downloads
    let http = reqwest::Client::builder()
        .user_agent(ci_server::USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()?;

    let orchestrator = Orchestrator::from_config(&cfg, Arc::clone(&store), http);
    tracing::info!(
        checkout = %cfg.checkout_path.display(),
        steps = cfg.steps.len(),
        "build orchestrator ready"
    );

    let state = AppState {
        store,
        orchestrator: Arc::new(orchestrator),
        authenticator: Arc::new(Authenticator::new(cfg.webhook_secret.clone())),
    };

    let app = ci_server::api::app(state, cfg.max_body_bytes);

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, "starting ci-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("ci-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
