//! Statistics based overload detection: local regression and robust
//! dispersion thresholds.

use crate::algorithms::OverloadDetector;

/// Extrapolates a locally weighted linear fit of the recent utilization and
/// fires when the predicted value reaches the threshold. With `robust` set,
/// the fit is refined once with bisquare weights computed from the residuals.
pub struct LoessDetector {
    threshold: f64,
    param: f64,
    length: usize,
    /// Migration time expressed in collector time steps.
    migration_time: f64,
    robust: bool,
}

impl LoessDetector {
    pub fn new(threshold: f64, param: f64, length: usize, migration_time: f64, robust: bool) -> Self {
        Self {
            threshold,
            param,
            length,
            migration_time,
            robust,
        }
    }
}

impl OverloadDetector for LoessDetector {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        if utilization.len() < self.length {
            return false;
        }
        let window = &utilization[utilization.len() - self.length..];
        let (intercept, slope) = if self.robust {
            loess_robust_parameter_estimates(window)
        } else {
            loess_parameter_estimates(window)
        };
        let prediction = intercept + slope * (self.length as f64 + self.migration_time);
        self.param * prediction >= self.threshold
    }
}

/// Fires when the last utilization value reaches `1 - param * MAD(history)`.
pub struct MadThresholdDetector {
    param: f64,
    limit: usize,
}

impl MadThresholdDetector {
    pub fn new(param: f64, limit: usize) -> Self {
        Self { param, limit }
    }
}

impl OverloadDetector for MadThresholdDetector {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        utilization_threshold(
            |data| 1. - self.param * mad(data),
            self.limit,
            utilization,
        )
    }
}

/// Fires when the last utilization value reaches `1 - param * IQR(history)`.
pub struct IqrThresholdDetector {
    param: f64,
    limit: usize,
}

impl IqrThresholdDetector {
    pub fn new(param: f64, limit: usize) -> Self {
        Self { param, limit }
    }
}

impl OverloadDetector for IqrThresholdDetector {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        utilization_threshold(
            |data| 1. - self.param * iqr(data),
            self.limit,
            utilization,
        )
    }
}

fn utilization_threshold(threshold: impl Fn(&[f64]) -> f64, limit: usize, utilization: &[f64]) -> bool {
    if utilization.is_empty() || utilization.len() < limit {
        return false;
    }
    threshold(utilization) <= *utilization.last().unwrap()
}

/// The median of a data set; the mean of the middle pair for even lengths.
pub fn median(data: &[f64]) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.
    }
}

/// The Median Absolute Deviation of a data set.
pub fn mad(data: &[f64]) -> f64 {
    let data_median = median(data);
    let deviations: Vec<f64> = data.iter().map(|x| (data_median - x).abs()).collect();
    median(&deviations)
}

/// The interquartile range, with quartile positions rounded half away from
/// zero over `n + 1` ranks.
pub fn iqr(data: &[f64]) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = (data.len() + 1) as f64;
    let q1 = ((0.25 * n).round() as usize - 1).min(sorted.len() - 1);
    let q3 = ((0.75 * n).round() as usize - 1).min(sorted.len() - 1);
    sorted[q3] - sorted[q1]
}

/// Generates `n` tricube weights; the first two positions repeat the third.
pub fn tricube_weights(n: usize) -> Vec<f64> {
    if n < 3 {
        return vec![1.; n];
    }
    let spread = (n - 1) as f64;
    let top = spread;
    let mut weights = Vec::with_capacity(n - 2);
    for i in 2..n {
        weights.push((1. - ((top - i as f64) / spread).powi(3)).powi(3));
    }
    let mut result = vec![weights[0], weights[0]];
    result.extend(weights);
    result
}

/// Generates tricube weights damped by the bisquare function of the fit
/// residuals.
pub fn tricube_bisquare_weights(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n < 3 {
        return tricube_weights(n);
    }
    let abs: Vec<f64> = data.iter().map(|x| x.abs()).collect();
    let s6 = 6. * median(&abs);
    let weights = tricube_weights(n);
    let mut damped = Vec::with_capacity(n - 2);
    for i in 2..n {
        damped.push(weights[i] * (1. - (data[i] / s6).powi(2)).powi(2));
    }
    let mut result = vec![damped[0], damped[0]];
    result.extend(damped);
    result
}

/// Fits `y = intercept + slope * x` over `x = 1..=n` by weighted least
/// squares with tricube weights. Returns `(intercept, slope)`.
pub fn loess_parameter_estimates(data: &[f64]) -> (f64, f64) {
    weighted_linear_fit(data, &tricube_weights(data.len()))
}

/// The robust variant: an initial tricube fit whose residuals are used to
/// damp the weights for a second fit.
pub fn loess_robust_parameter_estimates(data: &[f64]) -> (f64, f64) {
    let n = data.len();
    let (intercept, slope) = weighted_linear_fit(data, &tricube_weights(n));
    let residuals: Vec<f64> = data
        .iter()
        .enumerate()
        .map(|(i, y)| y - (intercept + slope * (i + 1) as f64))
        .collect();
    let abs: Vec<f64> = residuals.iter().map(|x| x.abs()).collect();
    if median(&abs) == 0. {
        // perfect fit, nothing to reweight
        return (intercept, slope);
    }
    weighted_linear_fit(data, &tricube_bisquare_weights(&residuals))
}

/// Minimizes the sum of `(w * (y - a - b x))^2` over `x = 1..=n` in closed
/// form.
fn weighted_linear_fit(data: &[f64], weights: &[f64]) -> (f64, f64) {
    let mut sw = 0.;
    let mut sx = 0.;
    let mut sy = 0.;
    let mut sxx = 0.;
    let mut sxy = 0.;
    for (i, (&y, &w)) in data.iter().zip(weights).enumerate() {
        let x = (i + 1) as f64;
        let w2 = w * w;
        sw += w2;
        sx += w2 * x;
        sy += w2 * y;
        sxx += w2 * x * x;
        sxy += w2 * x * y;
    }
    let denominator = sw * sxx - sx * sx;
    if denominator == 0. {
        return (0., 0.);
    }
    let slope = (sw * sxy - sx * sy) / denominator;
    let intercept = (sy - slope * sx) / sw;
    (intercept, slope)
}
