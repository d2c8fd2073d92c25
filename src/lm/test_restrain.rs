//! Fixed parameters and box constraints.
use std::sync::Arc;

use approx::assert_relative_eq;

use super::test_helpers::*;
use crate::error::FitError;
use crate::restrain::{RestrainKind, RestrainSet, RestrainType};
use crate::Marquardt;

fn bounded_amplitude(max: f64) -> Arc<RestrainSet> {
    use RestrainKind::{FixedBounds, Free};
    Arc::new(RestrainSet::new(&[Free, FixedBounds, Free], &[0.0, 0.0, 0.0], &[0.0, max, 0.0]).unwrap())
}

#[test]
fn test_fixed_parameter_keeps_its_value() {
    let result = Marquardt::new()
        .with_free_mask(vec![true, false, true])
        .fit(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_eq!(result.params[1], A + 1.0);
    assert!(result.status.is_success());
    for k in 0..3 {
        assert_eq!(result.covariance[(1, k)], 0.0);
        assert_eq!(result.covariance[(k, 1)], 0.0);
    }
    assert!(result.covariance[(2, 2)] > 0.0);
    assert_eq!(result.standard_errors()[1], 0.0);
}

#[test]
fn test_everything_fixed() {
    let initial = [0.0, A + 1.0, TAU + 1.0];
    let result = Marquardt::new()
        .with_free_mask(vec![false; 3])
        .fit(&reference_curve(), &initial)
        .unwrap();
    assert_eq!(result.params, initial);
    assert_eq!(result.iterations, 0);
    assert!(result.status.is_success());
    assert!(result.covariance.iter().all(|&c| c == 0.0));
}

#[test]
fn test_upper_bound_holds() {
    let result = Marquardt::new()
        .with_restrain_set(bounded_amplitude(A - 1.0))
        .fit(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert!(result.params[1] <= A - 1.0);
    // the unconstrained optimum lies outside, so the bound is active
    assert_relative_eq!(result.params[1], A - 1.0, epsilon = 1e-9);
    assert!(result.status.is_success(), "{:?}", result.status);
}

#[test]
fn test_initial_guess_is_projected() {
    let result = Marquardt::new()
        .with_restrain_set(bounded_amplitude(A - 1.0))
        .with_max_iterations(1)
        .fit(&reference_curve(), &[0.0, 100.0, TAU + 1.0])
        .unwrap();
    assert!(result.params[1] <= A - 1.0);
}

#[test]
fn test_inactive_bound_changes_nothing() {
    let free = Marquardt::new()
        .fit(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    let bounded = Marquardt::new()
        .with_restrain_set(bounded_amplitude(1.0e6))
        .fit(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_relative_eq!(free.params[1], bounded.params[1], epsilon = 1e-6);
    assert_relative_eq!(free.params[2], bounded.params[2], epsilon = 1e-6);
}

#[test]
fn test_fixed_parameter_ignores_bounds() {
    let result = Marquardt::new()
        .with_restrain_set(bounded_amplitude(A - 1.0))
        .with_free_mask(vec![true, false, true])
        .fit(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_eq!(result.params[1], A + 1.0);
}

#[test]
fn test_restrain_arity() {
    let err = Marquardt::new()
        .with_restrain_set(bounded_amplitude(A))
        .fit(&reference_curve(), &[0.0, A, TAU, 1.0, 1.0])
        .unwrap_err();
    assert_eq!(
        err,
        FitError::RestrainArity {
            configured: 3,
            params: 5
        }
    );
    // without an explicit set the process-wide one never covers 3 parameters here
    let err = Marquardt::new()
        .with_restrain(RestrainType::User)
        .fit(&reference_curve(), &[0.0, A, TAU])
        .unwrap_err();
    assert!(matches!(err, FitError::RestrainArity { params: 3, .. }));
}

#[test]
fn test_default_limits_keep_tau_positive() {
    // a rising curve drags the lifetime toward zero
    let samples: Vec<f64> = (0..64).map(|i| i as f64).collect();
    let curve = crate::curve::DecayCurve::new(PERIOD, &samples).unwrap();
    let result = Marquardt::new()
        .with_noise(crate::noise::NoiseType::Const, crate::noise::Sigma::Default)
        .fit(&curve, &[0.0, 1.0, 0.5])
        .unwrap();
    assert!(result.params[2] >= 0.1 * PERIOD);
}

#[test]
fn test_negative_lifetime_guess_recovers() {
    let result = Marquardt::new()
        .fit(&reference_curve(), &[0.0, A, -1.0])
        .unwrap();
    assert!(result.status.is_success(), "{:?}", result.status);
    assert_relative_eq!(result.params[1], A, epsilon = 1e-3);
    assert_relative_eq!(result.params[2], TAU, epsilon = 1e-3);
}
