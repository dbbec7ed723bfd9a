use vmpack::algorithms::mhod::bruteforce::solve2;
use vmpack::algorithms::mhod::estimation::{
    acceptable_variance, estimate_probability, mean, variance, MultisizeEstimation,
};
use vmpack::algorithms::mhod::l2::{l0, l1};
use vmpack::algorithms::mhod::{
    build_state_vector, utilization_to_state, utilization_to_states, MhodDetector,
};
use vmpack::algorithms::OverloadDetector;

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() < tolerance,
        "{} differs from {} by more than {}",
        actual,
        expected,
        tolerance
    );
}

#[test]
fn test_window_statistics() {
    assert_eq!(mean(&[1., 2., 3., 4.], 4), 2.5);
    assert_eq!(mean(&[1., 2.], 4), 0.75);
    assert_close(variance(&[0., 0., 1., 1.], 4), 1. / 3., 1e-12);
    assert_close(acceptable_variance(0.2, 5), 0.032, 1e-12);
    assert_eq!(estimate_probability(&[0, 1, 0, 1, 1], 5, 1), 0.6);
    assert_eq!(estimate_probability(&[1], 2, 1), 0.5);
}

#[test]
fn test_utilization_to_state() {
    let config = [0.4, 0.7];
    assert_eq!(utilization_to_state(&config, 0.0), 0);
    assert_eq!(utilization_to_state(&config, 0.39), 0);
    assert_eq!(utilization_to_state(&config, 0.4), 1);
    assert_eq!(utilization_to_state(&config, 0.69), 1);
    assert_eq!(utilization_to_state(&config, 0.7), 2);
    assert_eq!(utilization_to_state(&config, 1.5), 2);

    assert_eq!(utilization_to_states(&[1.0], &[0.2, 1.2, 0.9]), vec![0, 1, 0]);
}

#[test]
fn test_build_state_vector() {
    assert_eq!(build_state_vector(&[1.0], &[0.5]), vec![1., 0.]);
    assert_eq!(build_state_vector(&[1.0], &[0.5, 1.2]), vec![0., 1.]);
    assert_eq!(build_state_vector(&[0.4, 0.7], &[0.5]), vec![0., 1., 0.]);
}

#[test]
fn test_l_functions() {
    let p = vec![vec![0.4, 0.6], vec![0.9, 0.1]];
    let p0 = [1., 0.];

    assert_close(l0(&p0, &p, &[0.2, 0.8]), 1.690, 1e-3);
    assert_close(l0(&p0, &p, &[0.62, 0.38]), 1.404, 1e-3);
    assert_close(l1(&p0, &p, &[0.2, 0.8]), 0.828, 1e-3);
    assert_close(l1(&p0, &p, &[0.62, 0.38]), 0.341, 1e-3);
}

#[test]
fn test_solve2() {
    // objective x + y subject to x * y <= 0.25 over the {0, 0.5, 1} grid
    let solution = solve2(|x, y| x + y, |x, y| x * y, 0.25, 0.5, 1.0);
    assert_eq!(solution, vec![0., 1.]);

    // infeasible constraint everywhere except the origin, where the
    // objective does not improve on zero
    let solution = solve2(|x, y| x + y, |x, y| x + y, 0.0, 0.5, 1.0);
    assert!(solution.is_empty());
}

#[test]
fn test_estimation_windows() {
    let mut estimation = MultisizeEstimation::new(&[2, 3], 2);
    estimation.observe(0, 0);
    estimation.observe(0, 1);
    estimation.observe(1, 0);

    let selected = estimation.select_window();
    assert_eq!(selected[0][1], 2);
    let estimates = estimation.select_best_estimates(&selected);
    // request window of state 0 is [0, 1]: one of two entries is state 1
    assert_eq!(estimates[0][1], 0.5);
    assert_eq!(estimates[0][0], 0.5);
    // state 1 saw a single transition to state 0, over a window of two
    assert_eq!(estimates[1][0], 0.5);
    assert_eq!(estimates[1][1], 0.0);
}

// Counters only advance with the observed state: the total time grows on
// every call, the overload time only while the host sits in the last bucket.
#[test]
fn test_mhod_counters_are_monotone() {
    let mut detector =
        MhodDetector::new(vec![1.0], 0.3, vec![2, 3], 0.1, 100, 0.).unwrap();
    let mut history: Vec<f64> = Vec::new();
    let samples = [0.2, 0.5, 1.2, 1.3, 0.4, 1.1];
    let mut previous = (0, 0);
    for (i, &sample) in samples.iter().enumerate() {
        history.push(sample);
        detector.detect(&history);
        assert_eq!(detector.time_in_states, (i + 1) as u64);
        assert!(detector.time_in_state_n >= previous.1);
        previous = (detector.time_in_states, detector.time_in_state_n);
    }
    // three samples reached the overload bucket
    assert_eq!(detector.time_in_state_n, 3);
}

#[test]
fn test_mhod_quiet_host_never_fires() {
    let mut detector =
        MhodDetector::new(vec![1.0], 0.3, vec![2, 3], 0.1, 1, 0.).unwrap();
    let mut history = Vec::new();
    for _ in 0..10 {
        history.push(0.3);
        assert!(!detector.detect(&history));
    }
}

// A host pinned in the overload bucket: with a tight OTF bound no migration
// probability satisfies the constraint, so the detector demands a migration;
// with the bound at 1.0 a feasible policy exists and it stays quiet.
#[test]
fn test_mhod_saturated_host() {
    let history = [1.2, 1.2, 1.2];

    let mut strict = MhodDetector::new(vec![1.0], 0.3, vec![2, 3], 0.1, 2, 0.).unwrap();
    assert!(strict.detect(&history));

    let mut lax = MhodDetector::new(vec![1.0], 1.0, vec![2, 3], 0.1, 2, 0.).unwrap();
    assert!(!lax.detect(&history));
}

#[test]
fn test_mhod_waits_for_learning_steps() {
    let mut detector =
        MhodDetector::new(vec![1.0], 0.3, vec![2, 3], 0.1, 10, 0.).unwrap();
    assert!(!detector.detect(&[1.2, 1.2, 1.2]));
}

#[test]
fn test_mhod_parameter_validation() {
    assert!(MhodDetector::new(vec![], 0.3, vec![2], 0.1, 1, 0.).is_err());
    assert!(MhodDetector::new(vec![1.0], 0.3, vec![1], 0.1, 1, 0.).is_err());
    assert!(MhodDetector::new(vec![1.0], 0.3, vec![2], 0., 1, 0.).is_err());
}
