//! Brute-force search for the migration policy of the 2-state configuration.

use crate::common::frange;

use super::l2::LS;

/// Maximizes `objective(m0, m1)` over the grid `[0, limit]²` with the given
/// step, subject to `constraint(m0, m1) <= bound`. Non-finite values of the
/// objective or the constraint disqualify a grid point. Returns the empty
/// vector when no feasible point improves on zero.
pub fn solve2(
    objective: impl Fn(f64, f64) -> f64,
    constraint: impl Fn(f64, f64) -> f64,
    bound: f64,
    step: f64,
    limit: f64,
) -> Vec<f64> {
    let mut best = 0.;
    let mut solution = Vec::new();
    for x in frange(0., limit, step) {
        for y in frange(0., limit, step) {
            let result = objective(x, y);
            if !result.is_finite() || result <= best {
                continue;
            }
            let constraint_value = constraint(x, y);
            if constraint_value.is_finite() && constraint_value <= bound {
                best = result;
                solution = vec![x, y];
            }
        }
    }
    solution
}

/// Builds and solves the MHOD policy optimization: maximize the total
/// expected occupancy while the projected overloading time fraction stays
/// within `otf`.
#[allow(clippy::too_many_arguments)]
pub fn optimize(
    step: f64,
    limit: f64,
    otf: f64,
    migration_time: f64,
    p: &[Vec<f64>],
    state_vector: &[f64],
    time_in_states: f64,
    time_in_state_n: f64,
) -> Vec<f64> {
    let objective = |m0: f64, m1: f64| {
        let m = [m0, m1];
        LS.iter().map(|l| l(state_vector, p, &m)).sum::<f64>()
    };
    let constraint = |m0: f64, m1: f64| {
        let m = [m0, m1];
        let total: f64 = LS.iter().map(|l| l(state_vector, p, &m)).sum();
        let last = LS[LS.len() - 1](state_vector, p, &m);
        (migration_time + time_in_state_n + last) / (migration_time + time_in_states + total)
    };
    solve2(objective, constraint, otf, step, limit)
}
