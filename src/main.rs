use anyhow::{Context, Result};
use bedboard::api::create_app;
use bedboard::config::load_config_or_default;
use bedboard::engine::BoardEngine;
use bedboard::history::SystemClock;
use bedboard::store::{LogStore, SqliteLogStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bedboard=info".into()),
        )
        .init();

    info!("Bed board starting...");

    let config_path =
        std::env::var("BEDBOARD_CONFIG").unwrap_or_else(|_| "bedboard.toml".to_string());
    let config = load_config_or_default(&config_path)?;
    config.validate().context("Invalid configuration")?;

    info!(
        config_path = %config_path,
        beds = config.board.beds.len(),
        persistence = config.persistence.enabled,
        port = config.server.port,
        "Configuration loaded"
    );

    let store: Option<Arc<dyn LogStore>> = if config.persistence.enabled {
        let store: Arc<dyn LogStore> = Arc::new(
            SqliteLogStore::open(&config.persistence.db_path).with_context(|| {
                format!("Failed to open history store {}", config.persistence.db_path)
            })?,
        );
        info!(db_path = %config.persistence.db_path, "History store opened");
        Some(store)
    } else {
        info!("Persistence disabled, history is in-memory only");
        None
    };

    let mut engine = BoardEngine::new(
        config.engine_settings()?,
        store,
        Arc::new(SystemClock),
    );
    let restored = engine
        .hydrate()
        .await
        .context("Failed to load persisted history")?;
    info!(entries = restored, "Board engine ready");

    let broadcaster = engine.broadcaster();
    let (handle, engine_task) = engine.spawn(config.server.queue_capacity);

    let router = create_app(handle, broadcaster);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind board API port")?;
    info!(port = config.server.port, "Board API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Board API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    let _ = server_handle.await;

    // Open WebSocket sessions still hold engine handles; every applied
    // command is already persisted, so stop waiting after a grace period.
    match tokio::time::timeout(Duration::from_secs(5), engine_task).await {
        Ok(result) => result.context("Board engine task failed")?,
        Err(_) => warn!("Board engine still busy at shutdown, exiting anyway"),
    }
    info!("Bed board stopped");

    Ok(())
}
