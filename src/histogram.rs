/// Process-lifetime RTT histogram
use crate::constants::{BUCKET_COUNT, RTT_BUCKETS_MS};

/// Cumulative RTT state since process start. Never reset.
///
/// Each bucket holds an exclusive count: a measurement lands in the first
/// bucket whose threshold is `>=` the value, or in `overflow` past the last
/// threshold. Cumulative sums are only formed when rendering.
#[derive(Debug, Default)]
pub struct RttHistogram {
    bucket_counts: [u64; BUCKET_COUNT],
    overflow: u64,
    sum_ms: f64,
}

/// Point-in-time copy of an [`RttHistogram`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSnapshot {
    /// Exclusive counts, indexed like `RTT_BUCKETS_MS`
    pub bucket_counts: [u64; BUCKET_COUNT],
    /// Measurements above the largest threshold
    pub overflow: u64,
    /// Sum of every measurement in milliseconds
    pub sum_ms: f64,
}

impl RttHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one measurement in. Ties go to the smaller bucket.
    pub fn record(&mut self, rtt_ms: f64) {
        match bucket_index(rtt_ms) {
            Some(idx) => self.bucket_counts[idx] += 1,
            None => self.overflow += 1,
        }
        self.sum_ms += rtt_ms;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bucket_counts: self.bucket_counts,
            overflow: self.overflow,
            sum_ms: self.sum_ms,
        }
    }

    /// Number of measurements recorded so far
    pub fn total(&self) -> u64 {
        self.snapshot().total()
    }
}

impl HistogramSnapshot {
    pub fn total(&self) -> u64 {
        self.bucket_counts.iter().sum::<u64>() + self.overflow
    }

    /// `(threshold, count <= threshold)` pairs in ascending threshold order.
    pub fn cumulative_counts(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        RTT_BUCKETS_MS
            .iter()
            .zip(self.bucket_counts.iter())
            .scan(0u64, |running, (&threshold, &count)| {
                *running += count;
                Some((threshold, *running))
            })
    }
}

/// Index of the first bucket that holds `rtt_ms`, `None` for overflow.
#[inline]
fn bucket_index(rtt_ms: f64) -> Option<usize> {
    RTT_BUCKETS_MS
        .iter()
        .position(|&threshold| rtt_ms <= f64::from(threshold))
}
