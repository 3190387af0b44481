//! Prometheus Metrics Registry - Feed and Ingest Observability
//!
//! Mirrors the feed status and ingest counters into gauges exposed on
//! `/metrics`. Values are snapshots copied from the status/stats
//! channels, so every metric is a gauge.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::feed_state::FeedStatus;
use crate::usecases::ingest_pipeline::IngestStats;

/// Prometheus gauges, all named `tickstream_*`.
pub struct MetricsRegistry {
    registry: Registry,
    /// Stage code (0 idle .. 4 live, 5 closed, 6 error).
    pub stage: IntGauge,
    pub last_seq: IntGauge,
    pub accepted_samples: IntGauge,
    pub ingest_rate: Gauge,
    pub heartbeat_lag_ms: IntGauge,
    pub reconnect_attempts: IntGauge,
    /// Gap counters by scope (`global`, `series`) and unit (`gaps`, `missing`).
    pub gaps: IntGaugeVec,
    pub duplicates: IntGauge,
    /// Decode failures by `kind` (`text`, `binary`, `truncated`).
    pub decode_errors: IntGaugeVec,
    pub series: IntGauge,
    pub queue_samples: IntGauge,
    pub queue_dropped_samples: IntGauge,
    pub store_points: IntGauge,
    pub store_trimmed_points: IntGauge,
    pub undelivered_batches: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all gauges.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let stage = IntGauge::new("tickstream_stage", "Feed protocol stage code")?;
        let last_seq = IntGauge::new("tickstream_last_seq", "Highest accepted global sequence number")?;
        let accepted_samples = IntGauge::new(
            "tickstream_accepted_samples",
            "Samples accepted since start",
        )?;
        let ingest_rate = Gauge::new("tickstream_ingest_rate", "Accepted samples per second")?;
        let heartbeat_lag_ms = IntGauge::new(
            "tickstream_heartbeat_lag_ms",
            "Local time minus last heartbeat timestamp",
        )?;
        let reconnect_attempts = IntGauge::new(
            "tickstream_reconnect_attempts",
            "Reconnect attempts since the last reset",
        )?;
        let gaps = IntGaugeVec::new(
            Opts::new("tickstream_gaps", "Sequence gap counters"),
            &["scope", "unit"],
        )?;
        let duplicates = IntGauge::new(
            "tickstream_duplicates",
            "Replayed samples dropped as duplicates",
        )?;
        let decode_errors = IntGaugeVec::new(
            Opts::new("tickstream_decode_errors", "Frames dropped by the decoder"),
            &["kind"],
        )?;
        let series = IntGauge::new("tickstream_series", "Series seen on this connection")?;
        let queue_samples = IntGauge::new("tickstream_queue_samples", "Samples waiting in the ingest queue")?;
        let queue_dropped_samples = IntGauge::new(
            "tickstream_queue_dropped_samples",
            "Samples dropped by the overflow policy",
        )?;
        let store_points = IntGauge::new("tickstream_store_points", "Points held across all series buffers")?;
        let store_trimmed_points = IntGauge::new(
            "tickstream_store_trimmed_points",
            "Points removed by budget trimming",
        )?;
        let undelivered_batches = IntGauge::new(
            "tickstream_undelivered_batches",
            "Drain cycles the sample consumer could not take",
        )?;

        registry.register(Box::new(stage.clone()))?;
        registry.register(Box::new(last_seq.clone()))?;
        registry.register(Box::new(accepted_samples.clone()))?;
        registry.register(Box::new(ingest_rate.clone()))?;
        registry.register(Box::new(heartbeat_lag_ms.clone()))?;
        registry.register(Box::new(reconnect_attempts.clone()))?;
        registry.register(Box::new(gaps.clone()))?;
        registry.register(Box::new(duplicates.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(series.clone()))?;
        registry.register(Box::new(queue_samples.clone()))?;
        registry.register(Box::new(queue_dropped_samples.clone()))?;
        registry.register(Box::new(store_points.clone()))?;
        registry.register(Box::new(store_trimmed_points.clone()))?;
        registry.register(Box::new(undelivered_batches.clone()))?;

        Ok(Self {
            registry,
            stage,
            last_seq,
            accepted_samples,
            ingest_rate,
            heartbeat_lag_ms,
            reconnect_attempts,
            gaps,
            duplicates,
            decode_errors,
            series,
            queue_samples,
            queue_dropped_samples,
            store_points,
            store_trimmed_points,
            undelivered_batches,
        })
    }

    /// Copy a feed status snapshot into the gauges.
    pub fn observe_status(&self, status: &FeedStatus) {
        self.stage.set(status.stage.code());
        self.last_seq.set(gauge_value(status.last_seq));
        self.accepted_samples.set(gauge_value(status.accepted));
        self.ingest_rate.set(status.rate);
        self.heartbeat_lag_ms.set(status.heartbeat_lag_ms.unwrap_or(0));
        self.reconnect_attempts.set(i64::from(status.reconnect.attempts));
        self.series.set(gauge_value(status.series as u64));

        self.gaps
            .with_label_values(&["global", "gaps"])
            .set(i64::from(status.gaps.global));
        self.gaps
            .with_label_values(&["global", "missing"])
            .set(gauge_value(status.gaps.global_missing));
        self.gaps
            .with_label_values(&["series", "gaps"])
            .set(gauge_value(status.gaps.series));
        self.gaps
            .with_label_values(&["series", "missing"])
            .set(gauge_value(status.gaps.series_missing));
        self.duplicates.set(gauge_value(status.gaps.duplicates));

        self.decode_errors
            .with_label_values(&["text"])
            .set(gauge_value(status.decode.text_errors));
        self.decode_errors
            .with_label_values(&["binary"])
            .set(gauge_value(status.decode.binary_errors));
        self.decode_errors
            .with_label_values(&["truncated"])
            .set(gauge_value(status.decode.truncated_frames));
    }

    /// Copy ingest counters into the gauges.
    pub fn observe_ingest(&self, stats: &IngestStats) {
        self.queue_samples.set(gauge_value(stats.queue.queued_samples as u64));
        self.queue_dropped_samples.set(gauge_value(stats.queue.dropped_samples));
        self.store_points.set(gauge_value(stats.store.total_points as u64));
        self.store_trimmed_points.set(gauge_value(stats.store.trimmed_points));
        self.undelivered_batches.set(gauge_value(stats.undelivered_batches));
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve `/metrics` on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics = Arc::clone(&self);
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics);
                async move { metrics.render() }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

fn gauge_value(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
