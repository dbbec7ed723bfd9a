//! Threshold based detectors.

use crate::algorithms::{OverloadDetector, UnderloadDetector};

/// Fires when the last utilization value is at or below the threshold.
pub struct ThresholdUnderload {
    threshold: f64,
}

impl ThresholdUnderload {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl UnderloadDetector for ThresholdUnderload {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        match utilization.last() {
            Some(&last) => last <= self.threshold,
            None => false,
        }
    }
}

/// Fires when the mean of the last `n` utilization values is at or below the
/// threshold.
pub struct LastNAverageUnderload {
    threshold: f64,
    n: usize,
}

impl LastNAverageUnderload {
    pub fn new(threshold: f64, n: usize) -> Self {
        Self { threshold, n }
    }
}

impl UnderloadDetector for LastNAverageUnderload {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        match last_n_average(utilization, self.n) {
            Some(mean) => mean <= self.threshold,
            None => false,
        }
    }
}

/// Always considers the host underloaded (testing).
pub struct AlwaysUnderloaded;

impl UnderloadDetector for AlwaysUnderloaded {
    fn detect(&mut self, _utilization: &[f64]) -> bool {
        true
    }
}

/// Never considers the host underloaded.
pub struct NeverUnderloaded;

impl UnderloadDetector for NeverUnderloaded {
    fn detect(&mut self, _utilization: &[f64]) -> bool {
        false
    }
}

/// Fires when the last utilization value exceeds the threshold.
pub struct ThresholdOverload {
    threshold: f64,
}

impl ThresholdOverload {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl OverloadDetector for ThresholdOverload {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        match utilization.last() {
            Some(&last) => last > self.threshold,
            None => false,
        }
    }
}

/// Fires when the mean of the last `n` utilization values exceeds the
/// threshold.
pub struct LastNAverageOverload {
    threshold: f64,
    n: usize,
}

impl LastNAverageOverload {
    pub fn new(threshold: f64, n: usize) -> Self {
        Self { threshold, n }
    }
}

impl OverloadDetector for LastNAverageOverload {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        match last_n_average(utilization, self.n) {
            Some(mean) => mean > self.threshold,
            None => false,
        }
    }
}

/// Never considers the host overloaded (testing).
pub struct NeverOverloaded;

impl OverloadDetector for NeverOverloaded {
    fn detect(&mut self, _utilization: &[f64]) -> bool {
        false
    }
}

fn last_n_average(utilization: &[f64], n: usize) -> Option<f64> {
    if utilization.is_empty() || n == 0 {
        return None;
    }
    let tail = &utilization[utilization.len().saturating_sub(n)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}
