//! Overloading-Time-Fraction overload detection.

use log::debug;

use crate::algorithms::OverloadDetector;

/// Tracks the fraction of overloaded ticks and fires once the fraction,
/// inflated by the migration time, reaches the configured bound. The
/// decision is only made while the last sample itself is overloaded and at
/// least `limit` samples have been seen.
pub struct OtfDetector {
    otf: f64,
    threshold: f64,
    limit: usize,
    /// Migration time expressed in collector time steps.
    migration_time: f64,
    pub overload_steps: u64,
    pub total_steps: u64,
}

impl OtfDetector {
    pub fn new(otf: f64, threshold: f64, limit: usize, migration_time: f64) -> Self {
        Self {
            otf,
            threshold,
            limit,
            migration_time,
            overload_steps: 0,
            total_steps: 0,
        }
    }

    /// The current overloading time fraction including the migration time
    /// penalty.
    pub fn fraction(&self) -> f64 {
        (self.migration_time + self.overload_steps as f64) / (self.migration_time + self.total_steps as f64)
    }
}

impl OverloadDetector for OtfDetector {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        let last = match utilization.last() {
            Some(&last) => last,
            None => return false,
        };
        self.total_steps += 1;
        let overload = last >= self.threshold;
        if overload {
            self.overload_steps += 1;
        }
        if !overload || utilization.len() < self.limit {
            return false;
        }
        let decision = self.fraction() >= self.otf;
        debug!(
            "otf: overload steps {}, total steps {}, fraction {:.3}, decision {}",
            self.overload_steps,
            self.total_steps,
            self.fraction(),
            decision
        );
        decision
    }
}
