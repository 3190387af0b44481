//! Series Store - Bounded Per-Series Point Storage
//!
//! One [`CircularBuffer`] per series id plus a global point budget over
//! all of them. When the total exceeds the budget every series loses the
//! same fraction of its oldest points (`trim_ratio`, at least one point
//! per non-empty series) until the total fits again.
//!
//! The trim is approximate and fairness-oriented, not LRU: a slow series
//! is trimmed as hard as the one that grew the budget.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use super::ring::{CircularBuffer, LinearSeries};
use super::sample::{Sample, SeriesId};

/// Store sizing.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub series_capacity: usize,
    pub global_point_budget: usize,
    pub trim_ratio: f64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            series_capacity: 100_000,
            global_point_budget: 2_000_000,
            trim_ratio: 0.1,
        }
    }
}

/// Store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStats {
    pub series: usize,
    pub total_points: usize,
    pub appended_points: u64,
    pub trimmed_points: u64,
    pub trim_passes: u64,
}

/// All series buffers.
#[derive(Debug, Default)]
pub struct SeriesStore {
    buffers: HashMap<SeriesId, CircularBuffer>,
    limits: StoreLimits,
    total_points: usize,
    appended_points: u64,
    trimmed_points: u64,
    trim_passes: u64,
}

impl SeriesStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Buffer for `id`, created empty on first use.
    ///
    /// Read-only: points only enter through `append`/`append_batch`, which
    /// keep the global total in step.
    pub fn get_or_create(&mut self, id: &str) -> &CircularBuffer {
        self.buffer_mut(id)
    }

    fn buffer_mut(&mut self, id: &str) -> &mut CircularBuffer {
        let capacity = self.limits.series_capacity;
        self.buffers
            .entry(id.to_string())
            .or_insert_with(|| CircularBuffer::new(capacity))
    }

    /// Append one sample and enforce the global budget.
    pub fn append(&mut self, sample: &Sample) -> bool {
        let appended = self.append_unbounded(sample);
        self.enforce_budget();
        appended
    }

    /// Append a drained batch, enforcing the budget once at the end.
    pub fn append_batch(&mut self, samples: &[Sample]) -> usize {
        let appended = samples.iter().filter(|s| self.append_unbounded(s)).count();
        self.enforce_budget();
        appended
    }

    fn append_unbounded(&mut self, sample: &Sample) -> bool {
        if sample.y_value().is_none() {
            return false;
        }
        let buf = self.buffer_mut(&sample.series_id);
        let before = buf.len();
        buf.push_sample(sample);
        // A full buffer overwrote a point, so the total only grows when not full.
        let grew = buf.len() - before;
        self.total_points += grew;
        self.appended_points += 1;
        true
    }

    /// Proportional trim until the total fits the budget.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn enforce_budget(&mut self) {
        let budget = self.limits.global_point_budget;
        while self.total_points > budget {
            let mut removed = 0;
            for buf in self.buffers.values_mut() {
                if buf.is_empty() {
                    continue;
                }
                let n = ((buf.len() as f64 * self.limits.trim_ratio).ceil() as usize).max(1);
                removed += buf.trim_oldest(n);
            }
            if removed == 0 {
                break;
            }
            self.total_points -= removed;
            self.trimmed_points += removed as u64;
            self.trim_passes += 1;
            debug!(
                removed,
                total = self.total_points,
                budget,
                "Global point budget exceeded, trimmed all series"
            );
        }
    }

    /// Chronological copy of one series.
    pub fn linearize(&self, id: &str) -> Option<LinearSeries> {
        self.buffers.get(id).map(CircularBuffer::linearize)
    }

    pub fn get(&self, id: &str) -> Option<&CircularBuffer> {
        self.buffers.get(id)
    }

    /// Known series ids, sorted.
    pub fn series_ids(&self) -> Vec<SeriesId> {
        let mut ids: Vec<SeriesId> = self.buffers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub const fn total_points(&self) -> usize {
        self.total_points
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            series: self.buffers.len(),
            total_points: self.total_points,
            appended_points: self.appended_points,
            trimmed_points: self.trimmed_points,
            trim_passes: self.trim_passes,
        }
    }
}
