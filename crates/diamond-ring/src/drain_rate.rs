//! Smoothed dequeue-rate tracker, used by the search pipeline to decide
//! whether the odisk reader can be let off backpressure before
//! `pend_count` has actually reached the low-water mark.

use std::time::{Duration, Instant};

/// Exponentially-weighted moving average of dequeues-per-second.
pub struct DrainRate {
    alpha: f64,
    rate: f64,
    last_sample: Instant,
    since_last: u64,
}

impl DrainRate {
    /// `alpha` is the EWMA smoothing factor in `(0.0, 1.0]`; larger values
    /// track recent activity more aggressively.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        assert!(alpha > 0.0 && alpha <= 1.0, "alpha must be in (0, 1]");
        Self {
            alpha,
            rate: 0.0,
            last_sample: Instant::now(),
            since_last: 0,
        }
    }

    /// Record one dequeue event.
    pub fn record_dequeue(&mut self) {
        self.since_last += 1;
    }

    /// Roll the window forward and return the current smoothed rate
    /// (dequeues/sec). Call periodically (e.g. once per odisk-reader tick).
    pub fn sample(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample);
        if elapsed >= Duration::from_millis(1) {
            let instantaneous = f64::from(u32::try_from(self.since_last).unwrap_or(u32::MAX))
                / elapsed.as_secs_f64();
            self.rate = self.alpha * instantaneous + (1.0 - self.alpha) * self.rate;
            self.last_sample = now;
            self.since_last = 0;
        }
        self.rate
    }

    #[must_use]
    pub fn current(&self) -> f64 {
        self.rate
    }
}
