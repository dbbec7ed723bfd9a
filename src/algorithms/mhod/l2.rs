//! Closed-form expected state occupancy for the 2-state configuration.
//!
//! `l0` and `l1` give the expected time spent in the normal and overload
//! state as functions of the initial distribution, the transition matrix and
//! the migration probabilities `m`. Division by a vanishing denominator
//! yields a non-finite value which the policy search discards.

/// Expected occupancy of state 0.
pub fn l0(p_initial: &[f64], p_matrix: &[Vec<f64>], m: &[f64]) -> f64 {
    let p0 = p_initial[0];
    let p1 = p_initial[1];
    let p00 = p_matrix[0][0];
    let p01 = p_matrix[0][1];
    let p10 = p_matrix[1][0];
    let p11 = p_matrix[1][1];
    let m0 = m[0];
    let m1 = m[1];
    (p0 * (-1. * m1 * p11 + p11 - 1.) + (m1 * p1 - p1) * p10)
        / (p00 * (m1 * (p11 - m0 * p11) - p11 + m0 * (p11 - 1.) + 1.) - m1 * p11
            + p11
            + (m1 * (m0 * p01 - p01) - m0 * p01 + p01) * p10
            - 1.)
}

/// Expected occupancy of state 1, the overload state.
pub fn l1(p_initial: &[f64], p_matrix: &[Vec<f64>], m: &[f64]) -> f64 {
    let p0 = p_initial[0];
    let p1 = p_initial[1];
    let p00 = p_matrix[0][0];
    let p01 = p_matrix[0][1];
    let p10 = p_matrix[1][0];
    let p11 = p_matrix[1][1];
    let m0 = m[0];
    let m1 = m[1];
    -1. * (p00 * (m0 * p1 - p1) + p1 + p0 * (p01 - m0 * p01))
        / (p00 * (m1 * (p11 - m0 * p11) - p11 + m0 * (p11 - 1.) + 1.) - m1 * p11
            + p11
            + (m1 * (m0 * p01 - p01) - m0 * p01 + p01) * p10
            - 1.)
}

/// The L functions in state order.
pub const LS: [fn(&[f64], &[Vec<f64>], &[f64]) -> f64; 2] = [l0, l1];
