//! Ingest Pipeline - Frame-Paced Delivery Into the Series Store
//!
//! Receives accepted batches from the feed client, queues them under the
//! configured overflow policy and, once per frame interval, drains one
//! budgeted cycle:
//! 1. Append the drained samples to the shared series store (global
//!    point budget enforced once per cycle)
//! 2. Hand the same samples to the `on_samples` consumer
//! 3. Publish queue/store counters
//!
//! A slow consumer never blocks the pipeline: deliveries that do not fit
//! the output channel are counted as undelivered and dropped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::ingest_queue::{EnqueueOutcome, IngestQueue, QueueStats};
use crate::domain::sample::Sample;
use crate::domain::series_store::{SeriesStore, StoreStats};

/// Store shared between the pipeline (writer) and readers.
pub type SharedSeriesStore = Arc<RwLock<SeriesStore>>;

/// Pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestStats {
    pub queue: QueueStats,
    pub store: StoreStats,
    /// Drained cycles the `on_samples` consumer could not take.
    pub undelivered_batches: u64,
}

/// Consumer ends of the pipeline.
pub struct IngestOutputs {
    /// One concatenated batch per drain cycle.
    pub samples: mpsc::Receiver<Vec<Sample>>,
    pub stats: watch::Receiver<IngestStats>,
    pub store: SharedSeriesStore,
}

pub struct IngestPipeline {
    queue: IngestQueue,
    store: SharedSeriesStore,
    output_tx: mpsc::Sender<Vec<Sample>>,
    stats_tx: watch::Sender<IngestStats>,
    frame_interval: Duration,
    undelivered_batches: u64,
}

impl IngestPipeline {
    pub fn new(config: &AppConfig) -> (Self, IngestOutputs) {
        let store: SharedSeriesStore = Arc::new(RwLock::new(SeriesStore::new(config.store.limits())));
        let (output_tx, output_rx) = mpsc::channel(config.feed.channel_capacity);
        let (stats_tx, stats_rx) = watch::channel(IngestStats::default());

        let pipeline = Self {
            queue: IngestQueue::new(config.ingest.limits()),
            store: Arc::clone(&store),
            output_tx,
            stats_tx,
            frame_interval: Duration::from_millis(config.ingest.frame_interval_ms.max(1)),
            undelivered_batches: 0,
        };

        let outputs = IngestOutputs {
            samples: output_rx,
            stats: stats_rx,
            store,
        };

        (pipeline, outputs)
    }

    /// Queue one accepted batch.
    pub fn enqueue(&mut self, batch: Vec<Sample>) -> EnqueueOutcome {
        let outcome = self.queue.enqueue(batch);
        if outcome == EnqueueOutcome::Rejected {
            debug!(queued = self.queue.queued_samples(), "Incoming batch rejected by overflow policy");
        }
        outcome
    }

    /// Drain one cycle into the store and the consumer.
    ///
    /// Returns the number of samples delivered this cycle.
    pub async fn drain_cycle(&mut self) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let batch = self.queue.drain_cycle();
        let delivered = batch.len();
        if delivered > 0 {
            self.store.write().await.append_batch(&batch);

            match self.output_tx.try_send(batch) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.undelivered_batches += 1;
                    warn!(samples = delivered, "on_samples consumer lagging, delivery dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.undelivered_batches += 1;
                }
            }
        }

        self.publish_stats().await;
        delivered
    }

    async fn publish_stats(&self) {
        let store = self.store.read().await.stats();
        self.stats_tx.send_replace(IngestStats {
            queue: self.queue.stats(),
            store,
            undelivered_batches: self.undelivered_batches,
        });
    }

    /// Run until shutdown or until the feed's sample channel closes.
    ///
    /// A closed input is drained to empty before returning.
    ///
    /// # Errors
    /// Currently infallible.
    #[instrument(skip_all, fields(frame_ms = self.frame_interval.as_millis() as u64))]
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<Vec<Sample>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Ingest pipeline started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(stats = ?self.queue.stats(), "Ingest pipeline shut down");
                    return Ok(());
                }
                // A due frame drains before more input is taken.
                _ = ticker.tick() => {
                    self.drain_cycle().await;
                }
                batch = input.recv() => match batch {
                    Some(batch) => {
                        self.enqueue(batch);
                    }
                    None => {
                        while !self.queue.is_empty() {
                            self.drain_cycle().await;
                        }
                        info!(stats = ?self.queue.stats(), "Feed closed, ingest pipeline drained");
                        return Ok(());
                    }
                },
            }
        }
    }
}
