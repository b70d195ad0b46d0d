//! Ship command implementation.

use super::build_cache;
use crate::server::{start_server, ServerState};
use anyhow::{anyhow, Result};
use batchlog_core::health::HealthCheck;
use batchlog_core::metrics::CacheMetrics;
use batchlog_core::{Config, Level, LoggingEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for the ship command.
#[derive(Debug, Clone)]
pub struct ShipOptions {
    pub input: Option<PathBuf>,
    pub source: String,
    pub level: Level,
    pub json: bool,
}

/// How shipping ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipOutcome {
    /// Input reached end of file
    Completed,
    /// A shutdown signal arrived first
    Interrupted,
    /// Reading the input failed; what was read is still flushed
    InputFailed,
}

/// Turn one input line into an event.
///
/// With `json`, lines holding a serialized event are shipped as-is; anything
/// else becomes a plain message.
fn line_to_event(line: &str, options: &ShipOptions) -> LoggingEvent {
    if options.json {
        if let Ok(event) = serde_json::from_str::<LoggingEvent>(line) {
            return event;
        }
    }
    LoggingEvent::new(options.source.clone(), options.level, line)
}

/// Add every non-empty line to the cache until EOF or shutdown.
async fn pump_lines<R>(
    reader: R,
    cache: &batchlog_core::LoggingEventCache,
    options: &ShipOptions,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<(u64, ShipOutcome)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut shipped = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        cache.add(line_to_event(line, options))?;
                        shipped += 1;
                    }
                    None => return Ok((shipped, ShipOutcome::Completed)),
                }
            }
            _ = shutdown_rx.recv() => {
                return Ok((shipped, ShipOutcome::Interrupted));
            }
        }
    }
}

/// Run the ship command.
pub async fn run(config: Config, options: ShipOptions) -> Result<ShipOutcome> {
    let health = Arc::new(HealthCheck::new());
    let metrics = Arc::new(CacheMetrics::new());
    let cache = build_cache(&config, Arc::clone(&metrics), Arc::clone(&health)).await?;

    info!(
        cache = %config.cache.name,
        location = %config.storage.location,
        input = %options
            .input
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string()),
        "Starting log shipper"
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let server_state = Arc::new(ServerState {
        cache_name: config.cache.name.clone(),
        health: Arc::clone(&health),
        metrics: Arc::clone(&metrics),
    });
    tokio::spawn(start_server(
        server_state,
        config.monitoring.health_port,
        config.monitoring.metrics_port,
        shutdown_tx.subscribe(),
    ));

    // Spawn a task to handle shutdown signals (SIGINT and SIGTERM)
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_signal.send(());
    });

    let mut shutdown_rx = shutdown_tx.subscribe();
    let pumped = match &options.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            pump_lines(BufReader::new(file), &cache, &options, &mut shutdown_rx).await
        }
        None => {
            let stdin = tokio::io::stdin();
            pump_lines(BufReader::new(stdin), &cache, &options, &mut shutdown_rx).await
        }
    };

    let outcome = match pumped {
        Ok((shipped, outcome)) => {
            info!(shipped, outcome = ?outcome, "Input finished");
            outcome
        }
        Err(e) => {
            error!(error = %e, "Reading input failed, flushing what was read");
            ShipOutcome::InputFailed
        }
    };

    info!("Shutting down event cache (30s timeout)");
    let shutdown = tokio::time::timeout(SHUTDOWN_TIMEOUT, cache.shutdown()).await;

    // Stop the HTTP servers
    let _ = shutdown_tx.send(());

    match shutdown {
        Ok(Ok(report)) => {
            debug!(
                batch_id = report.batch_id,
                events = report.events_published,
                "Final batch published"
            );
            info!(
                events_added = metrics.events_added_total(),
                events_published = metrics.events_published_total(),
                flush_failures = metrics.flush_failures_total(),
                "Log shipper stopped"
            );
            Ok(outcome)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Final flush failed");
            Err(e.into())
        }
        Err(_) => {
            warn!("Shutdown timeout exceeded (30s), buffered events may be lost");
            Err(anyhow!(
                "shutdown timed out with {} flushes in flight",
                cache.in_flight()
            ))
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, using Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}
