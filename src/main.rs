use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slope_monitor_service::{
    api::{self, auth::IngestAuth, AppState},
    config::Config,
    stats::{DailyStatsGateway, RedisStatsCache, StatsCache},
    store,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;

    // Reading store (runs migrations for Postgres)
    let repo = store::connect(&config.storage).await?;

    // Optional daily stats cache; a bad URL only costs the cache
    let cache: Option<Arc<dyn StatsCache>> = match config.stats_cache_url.as_deref() {
        Some(url) => match RedisStatsCache::new(url, config.stats_cache_timeout) {
            Ok(cache) => {
                info!(
                    timeout_ms = config.stats_cache_timeout.as_millis() as u64,
                    ttl_secs = config.stats_cache_ttl.as_secs(),
                    "Daily stats cache enabled"
                );
                Some(Arc::new(cache))
            }
            Err(e) => {
                warn!(error = %e, "Invalid REDIS_URL; daily stats cache disabled");
                None
            }
        },
        None => {
            info!("Daily stats cache disabled; stats are computed from storage");
            None
        }
    };

    let gateway = DailyStatsGateway::new(
        repo.clone(),
        cache,
        config.stats_utc_offset,
        config.stats_cache_ttl,
    );

    let auth = IngestAuth::new(&config.ingest_token);
    if !auth.is_enabled() {
        warn!("INGEST_TOKEN is empty; ingestion and provisioning are disabled");
    }

    // Start HTTP server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(AppState::new(repo, gateway, auth)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
