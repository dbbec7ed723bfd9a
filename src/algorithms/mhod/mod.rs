//! Markov host overload detection.
//!
//! Utilization values are bucketed into states by the configured thresholds;
//! the last bucket is the overload state. Transition probabilities are
//! estimated with multisize sliding windows and, while the host sits in the
//! overload state, a short-horizon policy optimization decides whether any
//! migration probability keeps the long-run overloading time fraction within
//! the bound. An empty policy means no such probability exists and the host
//! must shed load now.

pub mod bruteforce;
pub mod estimation;
pub mod l2;

use log::debug;

use crate::algorithms::OverloadDetector;
use crate::{Error, Result};

use estimation::MultisizeEstimation;

pub struct MhodDetector {
    state_config: Vec<f64>,
    otf: f64,
    window_sizes: Vec<usize>,
    bruteforce_step: f64,
    learning_steps: usize,
    /// Migration time expressed in collector time steps.
    migration_time: f64,
    pub time_in_states: u64,
    pub time_in_state_n: u64,
    pub previous_state: usize,
}

impl MhodDetector {
    pub fn new(
        state_config: Vec<f64>,
        otf: f64,
        window_sizes: Vec<usize>,
        bruteforce_step: f64,
        learning_steps: usize,
        migration_time: f64,
    ) -> Result<Self> {
        if state_config.is_empty() {
            return Err(Error::AlgorithmParams("mhod: empty state_config".to_string()));
        }
        if window_sizes.iter().any(|&size| size < 2) {
            return Err(Error::AlgorithmParams(
                "mhod: window sizes must be at least 2".to_string(),
            ));
        }
        if bruteforce_step <= 0. {
            return Err(Error::AlgorithmParams(
                "mhod: bruteforce_step must be positive".to_string(),
            ));
        }
        Ok(Self {
            state_config,
            otf,
            window_sizes,
            bruteforce_step,
            learning_steps,
            migration_time,
            time_in_states: 0,
            time_in_state_n: 0,
            previous_state: 0,
        })
    }

    fn number_of_states(&self) -> usize {
        self.state_config.len() + 1
    }
}

impl OverloadDetector for MhodDetector {
    fn detect(&mut self, utilization: &[f64]) -> bool {
        if utilization.is_empty() {
            return false;
        }
        let states = utilization_to_states(&self.state_config, utilization);

        // The estimation is replayed over the full history each call, so the
        // estimates reflect the entire retained window of samples.
        let mut estimation = MultisizeEstimation::new(&self.window_sizes, self.number_of_states());
        let mut previous_state = 0;
        for &state in &states {
            estimation.observe(previous_state, state);
            previous_state = state;
        }
        let selected_windows = estimation.select_window();
        let p = estimation.select_best_estimates(&selected_windows);

        let state_vector = build_state_vector(&self.state_config, utilization);
        let current_state = *states.last().unwrap();
        self.previous_state = current_state;

        let state_n = self.state_config.len();
        self.time_in_states += 1;
        if current_state == state_n {
            self.time_in_state_n += 1;
        }

        debug!(
            "mhod: state {}, time in states {}, time in overload {}, p[n][n] {:.3}",
            current_state, self.time_in_states, self.time_in_state_n, p[state_n][state_n]
        );

        if utilization.len() >= self.learning_steps && current_state == state_n && p[state_n][state_n] > 0. {
            let policy = bruteforce::optimize(
                self.bruteforce_step,
                1.0,
                self.otf,
                self.migration_time,
                &p,
                &state_vector,
                self.time_in_states as f64,
                self.time_in_state_n as f64,
            );
            debug!("mhod: policy {:?}", policy);
            return policy.is_empty();
        }
        false
    }
}

/// Maps a utilization value to its state bucket: the first threshold strictly
/// above the value, or the overload state past the last threshold.
pub fn utilization_to_state(state_config: &[f64], utilization: f64) -> usize {
    state_config
        .iter()
        .position(|&threshold| utilization < threshold)
        .unwrap_or(state_config.len())
}

/// Maps a utilization history to its state history.
pub fn utilization_to_states(state_config: &[f64], utilization: &[f64]) -> Vec<usize> {
    utilization
        .iter()
        .map(|&value| utilization_to_state(state_config, value))
        .collect()
}

/// The one-hot distribution of the current state.
pub fn build_state_vector(state_config: &[f64], utilization: &[f64]) -> Vec<f64> {
    let state = utilization_to_state(state_config, *utilization.last().unwrap());
    (0..state_config.len() + 1)
        .map(|x| if x == state { 1. } else { 0. })
        .collect()
}
