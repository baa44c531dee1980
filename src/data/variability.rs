//! Heart-rate variability estimation.
//!
//! Keeps a bounded window of the most recent inter-beat intervals and
//! derives the RMSSD (root mean square of successive differences) from it.

use std::collections::VecDeque;

/// Rolling RMSSD estimator over a fixed-size window of inter-beat intervals.
#[derive(Debug, Clone)]
pub struct VariabilityEstimator {
    /// Most recent intervals in milliseconds, oldest first.
    window: VecDeque<f64>,
    /// Maximum number of intervals kept.
    capacity: usize,
}

impl VariabilityEstimator {
    /// Default window size.
    pub const DEFAULT_WINDOW: usize = 20;

    /// Number of samples needed before a statistic is produced.
    pub const MIN_SAMPLES: usize = 3;

    /// Create an estimator with the given window size.
    ///
    /// Sizes below [`Self::MIN_SAMPLES`] are raised to it, a smaller window
    /// could never produce a statistic.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(Self::MIN_SAMPLES);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new interval and return the updated RMSSD, rounded to whole
    /// milliseconds.
    ///
    /// Returns `None` while fewer than three intervals are buffered. Non-finite
    /// values are dropped without touching the window.
    pub fn push(&mut self, interval_ms: f64) -> Option<f64> {
        if !interval_ms.is_finite() {
            return None;
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(interval_ms);

        if self.window.len() < Self::MIN_SAMPLES {
            return None;
        }

        Some(rmssd(self.window.iter().copied()).round())
    }

    /// Clear all buffered intervals.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Number of buffered intervals.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Maximum number of buffered intervals.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed interval.
    pub fn last(&self) -> Option<f64> {
        self.window.back().copied()
    }
}

impl Default for VariabilityEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

/// Unrounded RMSSD of a series. Zero for fewer than two samples.
fn rmssd(samples: impl Iterator<Item = f64>) -> f64 {
    let mut previous: Option<f64> = None;
    let mut sum = 0.0;
    let mut count = 0usize;

    for x in samples {
        if let Some(prev) = previous {
            let diff = x - prev;
            sum += diff * diff;
            count += 1;
        }
        previous = Some(x);
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}
