use anyhow::{Context, Result};
use axum::serve;
use knowledge_exchange::core::config::Config;
use knowledge_exchange::core::routes::build_router;
use knowledge_exchange::core::startup::{prepare_directories, start_services};
use knowledge_exchange::core::state::AppState;
use knowledge_exchange::core::tracing_init::init_tracing;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

/// How long background tasks get to drain after the HTTP server stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load and validate configuration
    let config = Config::from_file(&config_path).context(format!(
        "Failed to load configuration from '{}'. \
        If this is your first time running the node, copy config.example.toml to config.toml and adjust the values.",
        config_path.display()
    ))?;

    init_tracing(&config.logging)?;

    // Build Tokio runtime with configured number of threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async_main(config, config_path))
}

async fn async_main(config: Config, config_path: PathBuf) -> Result<()> {
    info!(
        config_path = %config_path.display(),
        node_name = %config.server.node_name,
        http_port = config.server.http_port,
        peer_port = config.server.peer_port,
        num_threads = config.server.num_threads,
        log_level = %config.logging.level,
        log_format = %config.logging.format,
        "Knowledge exchange node starting"
    );

    if config.server.api_key.is_none() {
        warn!("No api_key configured, /metrics will refuse every request");
    }

    let http_addr = format!("{}:{}", config.server.bind_address, config.server.http_port);
    let state = Arc::new(AppState::from_config(config));

    prepare_directories(&state).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = start_services(&state, shutdown_rx).await?;

    info!(
        node_id = %state.node.local_peer().id,
        endpoint = %state.node.local_peer().endpoint(),
        "Knowledge exchange node startup complete"
    );

    // Build the router with middleware
    let app = build_router(Arc::clone(&state)).layer(
        ServiceBuilder::new().layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        ),
    );

    let listener = TcpListener::bind(&http_addr)
        .await
        .context(format!("Failed to bind HTTP listener to {}", http_addr))?;

    info!(address = %http_addr, "HTTP listener bound successfully");

    let served = serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error");

    info!("HTTP server stopped, stopping background services");

    if shutdown_tx.send(true).is_err() {
        warn!("Background services already stopped");
    }
    state.node.transfers().close();

    for handle in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Background task failed"),
            Err(_) => warn!("Background task did not stop in time"),
        }
    }

    info!("Shutting down gracefully");

    served
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
