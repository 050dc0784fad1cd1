//! # Rate Tracker
//!
//! A windowed counter. Every `threshold` observations it reports the event
//! rate over the window since the previous report, then starts a new window.
//! Ingest-side trackers use a larger threshold for smoothing; delivery-side
//! trackers use a smaller one so the reported edge rate reacts quickly.

use std::time::{Duration, Instant};

/// One rate measurement, emitted when a window closes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    /// Events per second over the closed window.
    pub rate: f64,
    /// Length of the closed window.
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RateTracker {
    count: u64,
    window_start: Instant,
    threshold: u64,
}

impl RateTracker {
    /// A zero threshold is treated as one.
    pub fn new(threshold: u64) -> Self {
        Self::starting_at(threshold, Instant::now())
    }

    pub fn starting_at(threshold: u64, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Records one event now.
    pub fn observe(&mut self) -> Option<RateSample> {
        self.observe_at(Instant::now())
    }

    /// Records one event at `now`. Returns a sample when the count reaches the
    /// threshold, resetting the count and the window start.
    pub fn observe_at(&mut self, now: Instant) -> Option<RateSample> {
        self.count += 1;
        if self.count < self.threshold {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.count as f64 / secs
        } else {
            f64::INFINITY
        };

        self.count = 0;
        self.window_start = now;
        Some(RateSample { rate, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_every_threshold_observations() {
        let start = Instant::now();
        let mut tracker = RateTracker::starting_at(20, start);

        for i in 1..20 {
            assert!(tracker.observe_at(start + Duration::from_millis(i * 10)).is_none());
        }
        let sample = tracker
            .observe_at(start + Duration::from_secs(2))
            .expect("20th observation closes the window");
        assert_eq!(sample.elapsed, Duration::from_secs(2));
        assert!((sample.rate - 10.0).abs() < 1e-9);

        // The window restarted at the emission instant.
        let window2 = start + Duration::from_secs(2);
        for i in 1..20 {
            assert!(tracker.observe_at(window2 + Duration::from_millis(i)).is_none());
        }
        let sample = tracker.observe_at(window2 + Duration::from_millis(500)).unwrap();
        assert!((sample.rate - 40.0).abs() < 1e-9);
    }

    #[test]
    fn zero_threshold_behaves_as_one() {
        let start = Instant::now();
        let mut tracker = RateTracker::starting_at(0, start);
        assert_eq!(tracker.threshold(), 1);
        let sample = tracker.observe_at(start + Duration::from_millis(250)).unwrap();
        assert!((sample.rate - 4.0).abs() < 1e-9);
    }
}
