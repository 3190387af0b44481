//! Ingest Queue - Frame-Budgeted Batch Buffer
//!
//! Decouples the feed's arrival rate from the consumer's frame rate.
//! Each drain cycle concatenates queued batches into one delivery,
//! bounded by a batch count and a wall-clock budget; whatever is left
//! waits for the next cycle.
//!
//! When the queued sample total would exceed `max_total_samples` the
//! overflow policy decides what is lost. Dropping is counted, never fatal.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::sample::Sample;

/// What to drop when the queue is over budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict queued batches from the front until under budget.
    #[default]
    DropOldest,
    /// Reject the incoming batch.
    DropNewest,
}

/// Queue budgets.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_batches_per_cycle: usize,
    pub max_cycle_time: Duration,
    pub max_total_samples: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_batches_per_cycle: 64,
            max_cycle_time: Duration::from_millis(4),
            max_total_samples: 500_000,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting this many older samples.
    QueuedWithEviction { dropped_samples: usize },
    /// The incoming batch was rejected.
    Rejected,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub queued_batches: usize,
    pub queued_samples: usize,
    pub dropped_batches: u64,
    pub dropped_samples: u64,
    pub delivered_samples: u64,
    pub cycles: u64,
    /// Cycles that stopped on a budget with batches still queued.
    pub deferred_cycles: u64,
}

/// Pending batches awaiting the next drain cycle.
#[derive(Debug, Default)]
pub struct IngestQueue {
    pending: VecDeque<Vec<Sample>>,
    pending_samples: usize,
    limits: QueueLimits,
    dropped_batches: u64,
    dropped_samples: u64,
    delivered_samples: u64,
    cycles: u64,
    deferred_cycles: u64,
}

impl IngestQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Queue one accepted batch, applying the overflow policy.
    pub fn enqueue(&mut self, batch: Vec<Sample>) -> EnqueueOutcome {
        if batch.is_empty() {
            return EnqueueOutcome::Queued;
        }
        let max = self.limits.max_total_samples;
        let incoming = batch.len();

        match self.limits.overflow_policy {
            OverflowPolicy::DropNewest => {
                // An empty queue always takes the batch so nothing starves.
                if !self.pending.is_empty() && self.pending_samples + incoming > max {
                    self.dropped_batches += 1;
                    self.dropped_samples += incoming as u64;
                    warn!(
                        incoming,
                        queued = self.pending_samples,
                        max,
                        "Ingest queue full, rejecting newest batch"
                    );
                    return EnqueueOutcome::Rejected;
                }
                self.push(batch);
                EnqueueOutcome::Queued
            }
            OverflowPolicy::DropOldest => {
                self.push(batch);
                let mut dropped = 0;
                // Never evict the batch just queued.
                while self.pending_samples > max && self.pending.len() > 1 {
                    if let Some(old) = self.pending.pop_front() {
                        self.pending_samples -= old.len();
                        dropped += old.len();
                        self.dropped_batches += 1;
                    }
                }
                if dropped == 0 {
                    return EnqueueOutcome::Queued;
                }
                self.dropped_samples += dropped as u64;
                warn!(
                    dropped,
                    queued = self.pending_samples,
                    max,
                    "Ingest queue full, evicted oldest batches"
                );
                EnqueueOutcome::QueuedWithEviction {
                    dropped_samples: dropped,
                }
            }
        }
    }

    fn push(&mut self, batch: Vec<Sample>) {
        self.pending_samples += batch.len();
        self.pending.push_back(batch);
    }

    /// Run one drain cycle against the wall clock.
    pub fn drain_cycle(&mut self) -> Vec<Sample> {
        let deadline = Instant::now() + self.limits.max_cycle_time;
        self.drain_until(deadline, Instant::now)
    }

    /// Drain up to the batch budget or until `now()` reaches `deadline`.
    ///
    /// At least one batch is taken per cycle when any is queued, so a
    /// zero time budget still makes progress.
    pub fn drain_until(&mut self, deadline: Instant, now: impl Fn() -> Instant) -> Vec<Sample> {
        self.cycles += 1;
        let mut out = Vec::new();
        let mut taken = 0;

        while taken < self.limits.max_batches_per_cycle.max(1) {
            let Some(batch) = self.pending.pop_front() else {
                break;
            };
            self.pending_samples -= batch.len();
            if out.is_empty() {
                out = batch;
            } else {
                out.extend(batch);
            }
            taken += 1;
            if now() >= deadline {
                break;
            }
        }

        if !self.pending.is_empty() {
            self.deferred_cycles += 1;
        }
        self.delivered_samples += out.len() as u64;
        out
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub const fn queued_samples(&self) -> usize {
        self.pending_samples
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued_batches: self.pending.len(),
            queued_samples: self.pending_samples,
            dropped_batches: self.dropped_batches,
            dropped_samples: self.dropped_samples,
            delivered_samples: self.delivered_samples,
            cycles: self.cycles,
            deferred_cycles: self.deferred_cycles,
        }
    }
}
