//! CLI subcommands.

pub mod ship;
pub mod status;

use anyhow::{Context, Result};
use batchlog_core::health::HealthCheck;
use batchlog_core::metrics::CacheMetrics;
use batchlog_core::publish::ObjectStorePublisher;
use batchlog_core::{build_monitor, Config, LoggingEventCache};
use std::sync::Arc;

/// Validate configuration and build a cache publishing to the configured
/// storage location.
pub(crate) async fn build_cache(
    config: &Config,
    metrics: Arc<CacheMetrics>,
    health: Arc<HealthCheck>,
) -> Result<LoggingEventCache> {
    config.validate()?;

    let publisher = ObjectStorePublisher::from_config(config)
        .await
        .context("Failed to create storage sink")?;

    let cache = LoggingEventCache::builder(config.cache.name.clone())
        .monitor(build_monitor(&config.trigger)?)
        .publisher(Arc::new(publisher))
        .metrics(metrics)
        .health(health)
        .build()?;

    Ok(cache)
}
