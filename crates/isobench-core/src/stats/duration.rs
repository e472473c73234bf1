//! Cumulative moving average of stream-set connection durations

use std::time::Duration;

/// Running mean of connection durations without sample history
///
/// The divisor is supplied by the caller: it is the process-wide count of
/// completed connect batches, not the number of updates seen here.
#[derive(Debug, Clone, Default)]
pub struct ConnDurationAverage {
    /// Current average in milliseconds
    average_ms: f64,
    /// Number of updates applied
    updates: u64,
    /// Most recent duration fed in
    last: Option<Duration>,
}

impl ConnDurationAverage {
    /// Create an empty average (0 ms)
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one duration
    ///
    /// `avg' = (duration + (n - 1) * avg) / n`, with `n` clamped to at least 1
    /// so the first connection simply becomes the average.
    ///
    /// # Arguments
    /// * `duration` - Connection duration of the batch that just ended
    /// * `n` - Completed connect batches so far, including this one
    ///
    /// # Returns
    /// The new average in milliseconds
    pub fn update(&mut self, duration: Duration, n: u64) -> f64 {
        let n = n.max(1) as f64;
        let sample_ms = duration.as_secs_f64() * 1000.0;
        self.average_ms = (sample_ms + (n - 1.0) * self.average_ms) / n;
        self.updates += 1;
        self.last = Some(duration);
        self.average_ms
    }

    /// Current average in milliseconds
    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    /// Current average as a duration
    pub fn average(&self) -> Duration {
        Duration::from_secs_f64(self.average_ms.max(0.0) / 1000.0)
    }

    /// Number of updates applied
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Most recent duration fed in
    pub fn last(&self) -> Option<Duration> {
        self.last
    }
}
