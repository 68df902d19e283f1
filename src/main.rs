use anyhow::Result;
use imgfailover::{Config, ImageResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::info;
use tracing_subscriber::EnvFilter;

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("imgfailover=debug,info")),
        )
        .init();

    info!("Starting image resolver maintenance");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    info!("Loading config from {}", config_path);

    let mut config = Config::from_file(&config_path)?;
    config.apply_env();

    let resolver = Arc::new(ImageResolver::new(&config)?);
    let maintenance = ImageResolver::spawn_maintenance(resolver.clone());
    info!(
        "Maintenance started (sweep every {}s)",
        config.cache.sweep_interval_seconds
    );

    let mut interval = time::interval(METRICS_LOG_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let m = resolver.metrics();
                let health = resolver.health_state().await;
                info!(
                    primary_available = health.available,
                    consecutive_failures = health.consecutive_failures,
                    total = m.total_resolutions,
                    primary = m.primary_hits,
                    secondary = m.secondary_hits,
                    failures = m.failures,
                    cache_hits = m.cache_hits,
                    cache_size = resolver.cache_len(),
                    failovers = m.failover_count,
                    "resolver metrics"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                maintenance.abort();
                break;
            }
        }
    }

    Ok(())
}
