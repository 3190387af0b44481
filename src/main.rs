//! Tickstream - Entry Point
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (`TICKSTREAM_FEED_URL` overrides the URL)
//! 2. Init tracing (JSON structured logging)
//! 3. Open the cursor store and build the feed client
//! 4. Spawn the ingest pipeline and the feed client
//! 5. Spawn metrics (:9090) and health/status (:8080) servers
//! 6. Spawn status/sample consumers (restart detection, logging)
//! 7. Wait for SIGINT, close the feed, broadcast shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use tickstream::adapters::feeds::WsConnector;
use tickstream::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use tickstream::adapters::persistence::JsonFileStore;
use tickstream::config;
use tickstream::domain::feed_state::FeedStatus;
use tickstream::domain::registry::RegistryRow;
use tickstream::domain::sample::Sample;
use tickstream::usecases::{FeedClient, FeedHandle, IngestPipeline, IngestStats};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config = config::loader::load_config("config.toml").context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        url = %config.feed.url,
        "Starting tickstream"
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 3. Cursor store + feed client ───────────────────────
    let store = JsonFileStore::open(&config.persistence.data_dir)
        .await
        .context("Failed to open cursor store")?;
    let (client, handle, feed) = FeedClient::new(&config, Arc::new(WsConnector::new()), Arc::new(store))
        .await
        .context("Failed to create feed client")?;

    // ── 4. Ingest pipeline + feed client tasks ──────────────
    let (pipeline, ingest) = IngestPipeline::new(&config);

    let pipeline_shutdown = shutdown_tx.subscribe();
    let pipeline_handle = tokio::spawn(async move {
        if let Err(e) = pipeline.run(feed.samples, pipeline_shutdown).await {
            error!(error = %e, "Ingest pipeline failed");
        }
    });

    let client_shutdown = shutdown_tx.subscribe();
    let client_handle = tokio::spawn(async move {
        if let Err(e) = client.run(client_shutdown).await {
            error!(error = %e, "Feed client failed");
        }
    });

    // ── 5. Metrics + health servers ─────────────────────────
    if config.metrics.enabled {
        let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);

        let serve_shutdown = shutdown_tx.subscribe();
        let bind_address = config.metrics.bind_address.clone();
        let server = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = server.serve(bind_address, serve_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        });

        tokio::spawn(observe_metrics(
            metrics,
            feed.status.clone(),
            ingest.stats.clone(),
            shutdown_tx.subscribe(),
        ));
    }

    let health = HealthServer::new(Arc::new(HealthState::new(feed.status.clone())), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = health.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    // ── 6. Consumers ────────────────────────────────────────
    tokio::spawn(watch_status(feed.status, handle.clone(), shutdown_tx.subscribe()));
    tokio::spawn(watch_registry(feed.registry, shutdown_tx.subscribe()));
    tokio::spawn(consume_samples(ingest.samples));

    info!("All tasks spawned, feed running");

    // ── 7. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for SIGINT, shutting down");
    }
    info!("SIGINT received, initiating graceful shutdown");

    handle.close().await;
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(5), client_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), pipeline_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Log stage transitions and react to a server restart.
///
/// A watermark below our cursor means the server lost its history: the
/// cursor is reset (and persisted) and the feed reconnects from scratch.
async fn watch_status(
    mut status_rx: watch::Receiver<FeedStatus>,
    handle: FeedHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut last_stage = status_rx.borrow().stage;
    let mut handled_resume = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let status = status_rx.borrow_and_update().clone();

                if status.stage != last_stage {
                    info!(
                        from = %last_stage,
                        to = %status.stage,
                        last_seq = status.last_seq,
                        gaps = status.gaps.global,
                        "Feed stage changed"
                    );
                    last_stage = status.stage;
                }

                if status.indicates_server_restart() && handled_resume != status.resume.requested {
                    handled_resume = status.resume.requested;
                    warn!(
                        cursor = status.last_seq,
                        wm_seq = status.bounds.map(|b| b.wm_seq),
                        "Server watermark behind cursor, resetting"
                    );
                    handle.reset_cursor(true).await;
                    handle.reconnect().await;
                }
            }
        }
    }
}

async fn watch_registry(mut registry_rx: watch::Receiver<Vec<RegistryRow>>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            changed = registry_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let series = registry_rx.borrow_and_update().len();
                debug!(series, "Series registry updated");
            }
        }
    }
}

async fn observe_metrics(
    metrics: Arc<MetricsRegistry>,
    mut status_rx: watch::Receiver<FeedStatus>,
    mut stats_rx: watch::Receiver<IngestStats>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            Ok(()) = status_rx.changed() => metrics.observe_status(&status_rx.borrow_and_update()),
            Ok(()) = stats_rx.changed() => metrics.observe_ingest(&stats_rx.borrow_and_update()),
            else => return,
        }
    }
}

/// Default `on_samples` consumer.
async fn consume_samples(mut samples_rx: mpsc::Receiver<Vec<Sample>>) {
    while let Some(batch) = samples_rx.recv().await {
        debug!(
            samples = batch.len(),
            first_seq = batch.first().map(|s| s.seq),
            last_seq = batch.last().map(|s| s.seq),
            "Samples delivered"
        );
    }
}
