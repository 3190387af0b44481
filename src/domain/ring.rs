//! Fixed-capacity circular buffer of plot points.
//!
//! Columns are stored struct-of-arrays (`x`, `y`, optional `o/h/l/c`) so a
//! renderer can take contiguous slices. `head` is the next write slot and
//! the logical start is `(head - count) mod capacity`. Once full, each
//! write overwrites the oldest point.

use serde::Serialize;

use super::sample::{Payload, Sample};

/// OHLC columns, allocated on the first bar appended.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OhlcColumns {
    pub o: Vec<f64>,
    pub h: Vec<f64>,
    pub l: Vec<f64>,
    pub c: Vec<f64>,
}

impl OhlcColumns {
    fn zeroed(len: usize) -> Self {
        Self {
            o: vec![0.0; len],
            h: vec![0.0; len],
            l: vec![0.0; len],
            c: vec![0.0; len],
        }
    }
}

/// Chronologically ordered copy of a buffer's contents.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LinearSeries {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub ohlc: Option<OhlcColumns>,
}

/// Circular buffer for one series.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    x: Vec<f64>,
    y: Vec<f64>,
    ohlc: Option<OhlcColumns>,
    capacity: usize,
    head: usize,
    count: usize,
}

impl CircularBuffer {
    /// Allocate a buffer. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            x: vec![0.0; capacity],
            y: vec![0.0; capacity],
            ohlc: None,
            capacity,
            head: 0,
            count: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn len(&self) -> usize {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub const fn head(&self) -> usize {
        self.head
    }

    /// Slot holding the oldest point.
    const fn start(&self) -> usize {
        (self.head + self.capacity - self.count) % self.capacity
    }

    /// Write one point. Returns false when the sample has no plottable value.
    #[allow(clippy::cast_precision_loss)]
    pub fn push_sample(&mut self, sample: &Sample) -> bool {
        let Some(y) = sample.y_value() else {
            return false;
        };
        let bar = match sample.payload {
            Payload::Ohlc {
                open,
                high,
                low,
                close,
            } => Some([open, high, low, close]),
            _ => None,
        };
        self.push(sample.t_ms as f64, y, bar);
        true
    }

    /// Circular write at `head`.
    pub fn push(&mut self, x: f64, y: f64, bar: Option<[f64; 4]>) {
        let slot = self.head;
        self.x[slot] = x;
        self.y[slot] = y;

        if let Some([o, h, l, c]) = bar {
            let capacity = self.capacity;
            let cols = self.ohlc.get_or_insert_with(|| OhlcColumns::zeroed(capacity));
            cols.o[slot] = o;
            cols.h[slot] = h;
            cols.l[slot] = l;
            cols.c[slot] = c;
        } else if let Some(cols) = self.ohlc.as_mut() {
            // Non-bar points in a bar series render as flat bars.
            cols.o[slot] = y;
            cols.h[slot] = y;
            cols.l[slot] = y;
            cols.c[slot] = y;
        }

        self.head = (self.head + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    /// Drop up to `n` oldest points. Returns how many were dropped.
    pub fn trim_oldest(&mut self, n: usize) -> usize {
        let n = n.min(self.count);
        self.count -= n;
        n
    }

    /// Contiguous chronological copy. Never mutates the buffer.
    pub fn linearize(&self) -> LinearSeries {
        let start = self.start();
        let ordered = |col: &[f64]| -> Vec<f64> {
            let mut out = Vec::with_capacity(self.count);
            let first = (self.capacity - start).min(self.count);
            out.extend_from_slice(&col[start..start + first]);
            out.extend_from_slice(&col[..self.count - first]);
            out
        };

        LinearSeries {
            x: ordered(&self.x),
            y: ordered(&self.y),
            ohlc: self.ohlc.as_ref().map(|cols| OhlcColumns {
                o: ordered(&cols.o),
                h: ordered(&cols.h),
                l: ordered(&cols.l),
                c: ordered(&cols.c),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, n: usize) -> CircularBuffer {
        let mut buf = CircularBuffer::new(capacity);
        for i in 0..n {
            buf.push(i as f64, i as f64 * 10.0, None);
        }
        buf
    }

    #[test]
    fn test_partial_fill_starts_at_zero() {
        let buf = filled(5, 3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.head(), 3);
        assert_eq!(buf.linearize().x, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_wrap_keeps_last_capacity_points() {
        let buf = filled(4, 11);
        assert_eq!(buf.len(), 4);
        let lin = buf.linearize();
        assert_eq!(lin.x, vec![7.0, 8.0, 9.0, 10.0]);
        assert_eq!(lin.y, vec![70.0, 80.0, 90.0, 100.0]);
        assert!(lin.ohlc.is_none());
    }

    #[test]
    fn test_exact_fill() {
        let buf = filled(4, 4);
        assert_eq!(buf.head(), 0);
        assert_eq!(buf.linearize().x, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_trim_after_wrap() {
        let mut buf = filled(4, 6);
        assert_eq!(buf.trim_oldest(1), 1);
        assert_eq!(buf.linearize().x, vec![3.0, 4.0, 5.0]);
        buf.push(6.0, 60.0, None);
        assert_eq!(buf.linearize().x, vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buf.trim_oldest(10), 4);
        assert!(buf.linearize().x.is_empty());
    }

    #[test]
    fn test_ohlc_columns() {
        let mut buf = CircularBuffer::new(3);
        buf.push(1.0, 4.0, Some([1.0, 5.0, 0.5, 4.0]));
        buf.push(2.0, 7.0, None);
        let lin = buf.linearize();
        let cols = lin.ohlc.unwrap();
        assert_eq!(cols.h, vec![5.0, 7.0]);
        assert_eq!(cols.c, vec![4.0, 7.0]);
    }

    #[test]
    fn test_linearize_is_pure() {
        let buf = filled(3, 5);
        let before = (buf.head(), buf.len());
        let _ = buf.linearize();
        let _ = buf.linearize();
        assert_eq!((buf.head(), buf.len()), before);
    }
}
