//! Multisize sliding window estimation of Markov transition probabilities.
//!
//! For every source state the estimator keeps a bounded window of observed
//! next-states. From that window it maintains, per target state and per
//! candidate window size, a rolling window of probability estimates together
//! with their variances and the acceptable variance `p (1 - p) / w`. At
//! decision time the largest window whose variance stays within the
//! acceptable bound is selected for each transition.

use std::collections::VecDeque;

/// The mean of a partially filled window of the given size.
pub fn mean(data: &[f64], window_size: usize) -> f64 {
    data.iter().sum::<f64>() / window_size as f64
}

/// The variance of a partially filled window of the given size.
pub fn variance(data: &[f64], window_size: usize) -> f64 {
    let m = mean(data, window_size);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (window_size - 1) as f64
}

/// The acceptable variance of a probability estimate over a window.
pub fn acceptable_variance(probability: f64, window_size: usize) -> f64 {
    probability * (1. - probability) / window_size as f64
}

/// The fraction of window entries equal to the given state.
pub fn estimate_probability(data: &[usize], window_size: usize, state: usize) -> f64 {
    data.iter().filter(|&&x| x == state).count() as f64 / window_size as f64
}

/// Estimation state for one host: request windows plus per-transition
/// estimate windows, variances and acceptable variances.
pub struct MultisizeEstimation {
    window_sizes: Vec<usize>,
    number_of_states: usize,
    request_windows: Vec<VecDeque<usize>>,
    estimate_windows: Vec<Vec<Vec<VecDeque<f64>>>>,
    variances: Vec<Vec<Vec<f64>>>,
    acceptable_variances: Vec<Vec<Vec<f64>>>,
}

impl MultisizeEstimation {
    pub fn new(window_sizes: &[usize], number_of_states: usize) -> Self {
        let max_window = window_sizes.iter().copied().max().unwrap_or(1);
        let request_windows = (0..number_of_states)
            .map(|_| VecDeque::with_capacity(max_window))
            .collect();
        let estimate_windows = (0..number_of_states)
            .map(|_| {
                (0..number_of_states)
                    .map(|_| window_sizes.iter().map(|&size| VecDeque::with_capacity(size)).collect())
                    .collect()
            })
            .collect();
        let variances = vec![vec![vec![1.0; window_sizes.len()]; number_of_states]; number_of_states];
        let acceptable_variances = variances.clone();
        Self {
            window_sizes: window_sizes.to_vec(),
            number_of_states,
            request_windows,
            estimate_windows,
            variances,
            acceptable_variances,
        }
    }

    fn max_window(&self) -> usize {
        self.window_sizes.iter().copied().max().unwrap_or(1)
    }

    /// Ingests one observed transition and refreshes the estimates derived
    /// from the source state's request window.
    pub fn observe(&mut self, previous_state: usize, current_state: usize) {
        let max_window = self.max_window();
        let request_window = &mut self.request_windows[previous_state];
        if request_window.len() == max_window {
            request_window.pop_front();
        }
        request_window.push_back(current_state);

        let request: Vec<usize> = self.request_windows[previous_state].iter().copied().collect();
        for state in 0..self.number_of_states {
            for (w, &window_size) in self.window_sizes.iter().enumerate() {
                let slice_from = request.len().saturating_sub(window_size);
                let probability = estimate_probability(&request[slice_from..], window_size, state);
                let estimates = &mut self.estimate_windows[previous_state][state][w];
                if estimates.len() == window_size {
                    estimates.pop_front();
                }
                estimates.push_back(probability);

                let estimates: Vec<f64> = self.estimate_windows[previous_state][state][w]
                    .iter()
                    .copied()
                    .collect();
                self.variances[previous_state][state][w] = if estimates.len() < window_size {
                    1.0
                } else {
                    variance(&estimates, window_size)
                };
                self.acceptable_variances[previous_state][state][w] =
                    acceptable_variance(*estimates.last().unwrap(), window_size);
            }
        }
    }

    /// For every transition pair, the largest window size whose variance is
    /// within the acceptable bound; the smallest size when none qualifies.
    pub fn select_window(&self) -> Vec<Vec<usize>> {
        let n = self.number_of_states;
        let mut selected = vec![vec![self.window_sizes[0]; n]; n];
        for i in 0..n {
            for j in 0..n {
                for (w, &window_size) in self.window_sizes.iter().enumerate() {
                    if self.variances[i][j][w] > self.acceptable_variances[i][j][w] {
                        break;
                    }
                    selected[i][j] = window_size;
                }
            }
        }
        selected
    }

    /// The newest probability estimate per transition pair at the selected
    /// window sizes; 0 when no estimate has been made yet.
    pub fn select_best_estimates(&self, selected_windows: &[Vec<usize>]) -> Vec<Vec<f64>> {
        let n = self.number_of_states;
        let mut estimates = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                let w = self
                    .window_sizes
                    .iter()
                    .position(|&size| size == selected_windows[i][j])
                    .unwrap_or(0);
                if let Some(&last) = self.estimate_windows[i][j][w].back() {
                    estimates[i][j] = last;
                }
            }
        }
        estimates
    }

    /// The variance table, indexed `[source][target][window index]`.
    pub fn variances(&self) -> &Vec<Vec<Vec<f64>>> {
        &self.variances
    }

    /// The acceptable variance table, indexed like [`Self::variances`].
    pub fn acceptable_variances(&self) -> &Vec<Vec<Vec<f64>>> {
        &self.acceptable_variances
    }
}
