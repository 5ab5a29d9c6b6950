use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use footfall::config::Config;
use footfall::intercept::{create_router, InterceptorState};

#[derive(Parser)]
#[command(name = "footfall")]
#[command(about = "Visitor logging, notification and rate limiting service", long_about = None)]
struct Cli {
    /// Bind host (overrides HOST)
    #[arg(long)]
    host: Option<String>,
    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Visitor log location (overrides VISITOR_LOG_PATH)
    #[arg(long)]
    log_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("footfall=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(log_path) = cli.log_path {
        config.event_log.path = log_path;
    }
    info!("Loaded configuration");

    let state = Arc::new(InterceptorState::from_config(&config).await?);

    if state.geo.is_enabled() {
        info!("🌍 GeoIP lookups enabled");
    } else {
        info!("🌍 No GeoIP database configured, locations will be empty");
    }
    info!(
        "🚦 Rate limit: {} requests per {}s per client",
        config.rate_limit.max_requests, config.rate_limit.window_secs
    );

    let sweeper = state
        .limiter
        .spawn_sweeper(config.rate_limit.sweep_interval());

    let router = create_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Logger running at http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down...");
    state.limiter.shutdown();
    let _ = sweeper.await;
    state.dispatcher.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
