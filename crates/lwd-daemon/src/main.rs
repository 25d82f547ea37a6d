//! lwd-daemon entry point.
//!
//! Sets up tracing, loads config, starts the runtime, wires middleware and
//! serves HTTP. Route handlers live in `routes.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use lwd_daemon::{boot, routes};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "lwd-daemon", about = "Lorry weigh desk HTTP/SSE host")]
struct Cli {
    /// Layered YAML config files, comma separated; later files win.
    #[arg(long = "config", env = boot::ENV_CONFIG, value_delimiter = ',')]
    config: Vec<PathBuf>,

    /// Listen address.
    #[arg(long, env = boot::ENV_DAEMON_ADDR, default_value = "127.0.0.1:8899")]
    addr: SocketAddr,

    /// Fixed simulator seed for reproducible demo runs.
    #[arg(long)]
    sim_seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let cli = Cli::parse();

    let loaded = boot::load_config(&cli.config)?;
    info!(config_hash = %loaded.config_hash, files = cli.config.len(), "config loaded");

    let store = boot::open_store().await?;
    let shared = Arc::new(boot::start_runtime(&loaded, store, cli.sim_seed).await?);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!("lwd-daemon listening on http://{}", cli.addr);
    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    shared.runtime.config().disconnect_all().await;
    info!("lwd-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
