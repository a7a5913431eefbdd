use anyhow::{Context, Result};
use faceidd::api::{create_router, AppState};
use faceidd::config::Config;
use faceidd::store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "faceidd starting");

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        data_dir = %config.data_dir.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let pipeline = faceidd::engine::load_pipeline(&config);
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;

    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState::new(config, pipeline, Arc::new(store)));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "faceidd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("faceidd shutting down");
    Ok(())
}
