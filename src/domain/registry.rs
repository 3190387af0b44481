//! Series Registry - Per-Series Accounting
//!
//! Accumulates counts, sequence bounds and per-series gap counters for
//! every series seen on the stream. Only accepted samples mutate it.
//!
//! Per-series gaps are a second axis, independent from the global one:
//! interleaved series advance the global counter without advancing every
//! series' own counter, so a series can miss points while the global
//! sequence looks contiguous.

use std::collections::HashMap;

use serde::Serialize;

use super::sample::{Sample, SeriesId};

/// Accumulated metadata for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryRow {
    pub id: SeriesId,
    pub count: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub first_ms: i64,
    pub last_ms: i64,
    pub prev_series_seq: Option<u64>,
    /// Number of per-series gap events.
    pub gaps: u32,
    /// Total per-series indices skipped.
    pub missed: u64,
}

impl RegistryRow {
    fn new(sample: &Sample) -> Self {
        Self {
            id: sample.series_id.clone(),
            count: 0,
            first_seq: sample.seq,
            last_seq: sample.seq,
            first_ms: sample.t_ms,
            last_ms: sample.t_ms,
            prev_series_seq: None,
            gaps: 0,
            missed: 0,
        }
    }

    /// Fold one accepted sample into the row. Returns the gap size, if any.
    fn observe(&mut self, sample: &Sample) -> Option<u64> {
        self.count += 1;
        self.last_seq = sample.seq;
        self.last_ms = sample.t_ms;

        let series_seq = sample.series_seq?;
        let missing = match self.prev_series_seq {
            None if series_seq > 1 => series_seq - 1,
            Some(prev) if series_seq > prev.saturating_add(1) => series_seq - prev - 1,
            _ => 0,
        };
        self.prev_series_seq = Some(series_seq);

        if missing == 0 {
            return None;
        }
        self.gaps = self.gaps.saturating_add(1);
        self.missed = self.missed.saturating_add(missing);
        Some(missing)
    }
}

/// Registry of all series observed in the current session.
#[derive(Debug, Default)]
pub struct SeriesRegistry {
    rows: HashMap<SeriesId, RegistryRow>,
    dirty: bool,
}

impl SeriesRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted sample. Returns the per-series gap size, if any.
    pub fn record(&mut self, sample: &Sample) -> Option<u64> {
        self.dirty = true;
        self.rows
            .entry(sample.series_id.clone())
            .or_insert_with(|| RegistryRow::new(sample))
            .observe(sample)
    }

    /// Look up one series.
    pub fn get(&self, id: &str) -> Option<&RegistryRow> {
        self.rows.get(id)
    }

    /// Number of distinct series.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no series has been seen.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Snapshot of all rows, sorted by id.
    pub fn rows(&self) -> Vec<RegistryRow> {
        let mut rows: Vec<RegistryRow> = self.rows.values().cloned().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Sum of per-series gap events and missed indices.
    pub fn gap_totals(&self) -> (u64, u64) {
        self.rows.values().fold((0, 0), |(gaps, missed), row| {
            (gaps + u64::from(row.gaps), missed + row.missed)
        })
    }

    /// Whether the registry changed since the last call; clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Forget every series.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::Payload;

    fn sample(seq: u64, id: &str, series_seq: Option<u64>) -> Sample {
        Sample {
            seq,
            series_id: id.to_string(),
            series_seq,
            t_ms: seq as i64 * 1000,
            payload: Payload::Scalar { value: 0.0 },
        }
    }

    #[test]
    fn test_interleaved_series_gaps_are_independent() {
        let mut registry = SeriesRegistry::new();
        // A: 1,2,4   B: 1,2,3   global: 1..=6, contiguous
        let feed = [
            ("A", 1),
            ("B", 1),
            ("A", 2),
            ("B", 2),
            ("B", 3),
            ("A", 4),
        ];
        for (i, (id, s)) in feed.iter().enumerate() {
            registry.record(&sample(i as u64 + 1, id, Some(*s)));
        }

        let a = registry.get("A").unwrap();
        assert_eq!(a.count, 3);
        assert_eq!(a.gaps, 1);
        assert_eq!(a.missed, 1);
        assert_eq!(a.first_seq, 1);
        assert_eq!(a.last_seq, 6);
        assert_eq!(a.prev_series_seq, Some(4));

        let b = registry.get("B").unwrap();
        assert_eq!(b.gaps, 0);
        assert_eq!(b.missed, 0);

        assert_eq!(registry.gap_totals(), (1, 1));
    }

    #[test]
    fn test_first_observation_above_one_is_a_gap() {
        let mut registry = SeriesRegistry::new();
        assert_eq!(registry.record(&sample(10, "late", Some(5))), Some(4));
        let row = registry.get("late").unwrap();
        assert_eq!(row.gaps, 1);
        assert_eq!(row.missed, 4);
    }

    #[test]
    fn test_missing_series_seq_only_counts() {
        let mut registry = SeriesRegistry::new();
        registry.record(&sample(1, "s", None));
        registry.record(&sample(2, "s", None));
        let row = registry.get("s").unwrap();
        assert_eq!(row.count, 2);
        assert_eq!(row.gaps, 0);
        assert_eq!(row.prev_series_seq, None);
    }

    #[test]
    fn test_dirty_flag() {
        let mut registry = SeriesRegistry::new();
        assert!(!registry.take_dirty());
        registry.record(&sample(1, "s", Some(1)));
        assert!(registry.take_dirty());
        assert!(!registry.take_dirty());
    }

    #[test]
    fn test_rows_sorted_by_id() {
        let mut registry = SeriesRegistry::new();
        registry.record(&sample(1, "zeta", None));
        registry.record(&sample(2, "alpha", None));
        let ids: Vec<_> = registry.rows().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
