//! Latency statistics for submit-to-completion cycles.
//!
//! Tracks minimum, maximum, average and a fixed-width histogram so that
//! per-device measurements taken on different threads can be merged into one
//! report.

const BUCKETS: usize = 20;

/// Tracks cycle latencies with minimal overhead.
///
/// Buckets are `bucket_ns` wide; the last bucket collects everything beyond
/// the histogram's range.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub count: u64,
    pub bucket_ns: u64,
    pub buckets: [u64; BUCKETS],
}

impl LatencyStats {
    /// Creates an empty tracker.
    ///
    /// Min starts at u64::MAX so the first measurement becomes the minimum.
    ///
    /// # Arguments
    ///
    /// * `bucket_ns` - Histogram bucket width in nanoseconds
    pub fn new(bucket_ns: u64) -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            count: 0,
            bucket_ns: bucket_ns.max(1),
            buckets: [0; BUCKETS],
        }
    }

    /// Records a latency measurement in nanoseconds.
    pub fn update(&mut self, nanos: u64) {
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
        self.sum += nanos;
        self.count += 1;

        let idx = (nanos / self.bucket_ns).min(BUCKETS as u64 - 1) as usize;
        self.buckets[idx] += 1;
    }

    /// Folds another tracker with the same bucket width into this one.
    pub fn merge(mut self, other: &LatencyStats) -> Self {
        debug_assert_eq!(self.bucket_ns, other.bucket_ns);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *mine += theirs;
        }
        self
    }

    /// Average latency in nanoseconds, or 0.0 with no measurements.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Prints count, min, average, max and the non-empty histogram buckets.
    pub fn print_report(&self) {
        println!("\nLatency Metrics (Submit to Completion)");
        println!("Count: {}", self.count);
        if self.count == 0 {
            return;
        }

        let avg_ns = self.avg();
        if avg_ns < 1000.0 {
            println!("Min:   {:.2} ns", self.min as f64);
            println!("Avg:   {:.2} ns", avg_ns);
            println!("Max:   {:.2} ns", self.max as f64);
        } else {
            println!("Min:   {:.2} us", self.min as f64 / 1000.0);
            println!("Avg:   {:.2} us", avg_ns / 1000.0);
            println!("Max:   {:.2} us", self.max as f64 / 1000.0);
        }

        let width_us = self.bucket_ns as f64 / 1000.0;
        println!("Distribution ({width_us:.0}us buckets):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let range_end = if i == BUCKETS - 1 { ">" } else { "" };
                let lower = i as f64 * width_us;
                let upper = (i + 1) as f64 * width_us;
                println!("[{lower:5.0}-{upper:5.0}{range_end} us]: {count}");
            }
        }
    }
}
