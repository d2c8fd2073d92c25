use approx::assert_relative_eq;
use nalgebra::DMatrix;

use super::test_helpers::MockProblem;
use crate::curve::DecayCurve;
use crate::error::{FitError, FitStatus};
use crate::noise::{NoiseModel, NoiseType, Sigma};
use crate::restrain::RestrainLimit;
use crate::Marquardt;

fn setup(samples: &[f64]) -> (DecayCurve, NoiseModel) {
    let curve = DecayCurve::new(1.0, samples).unwrap();
    let noise = NoiseModel::new(&curve, NoiseType::Const, &Sigma::Default).unwrap();
    (curve, noise)
}

#[test]
fn already_zero() {
    let (curve, noise) = setup(&[1.0, 2.0, 3.0]);
    let problem = MockProblem::new(vec![1.0, 2.0, 3.0], DMatrix::from_element(3, 1, 1.0));
    let result = Marquardt::new()
        .minimize(&curve, &problem, &noise, vec![0.5], vec![0], &[RestrainLimit::FREE])
        .unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.chisq, 0.0);
    assert_eq!(result.params, vec![0.5]);
    assert_eq!(problem.calls(), 1);
    assert_relative_eq!(result.covariance[(0, 0)], 1.0 / 3.0);
}

#[test]
fn non_finite_start() {
    let (curve, noise) = setup(&[1.0, 2.0, 3.0]);
    let problem =
        MockProblem::new(vec![1.0, 2.0, 3.0], DMatrix::from_element(3, 1, 1.0)).nan_after(0);
    let err = Marquardt::new()
        .minimize(&curve, &problem, &noise, vec![0.5], vec![0], &[RestrainLimit::FREE])
        .unwrap_err();
    assert!(matches!(err, FitError::Numerical(_)));
    assert!(!err.is_validation());
}

#[test]
fn non_finite_trials() {
    let (curve, noise) = setup(&[1.0, 2.0, 3.0]);
    let problem =
        MockProblem::new(vec![0.0, 0.0, 0.0], DMatrix::from_element(3, 1, 1.0)).nan_after(1);
    let result = Marquardt::new()
        .with_lambda(1.0)
        .minimize(&curve, &problem, &noise, vec![0.5], vec![0], &[RestrainLimit::FREE])
        .unwrap();
    assert!(matches!(result.status, FitStatus::Numerical(_)));
    assert_eq!(result.status.code(), -1);
    // the last good iterate survives
    assert_eq!(result.params, vec![0.5]);
    assert_eq!(result.chisq, 14.0);
    assert_eq!(result.fitted, vec![0.0; 3]);
    // one trial for every lambda from 1 to 1e16
    assert_eq!(problem.calls(), 18);
    assert!(problem.params()[1][0] > 0.5);
}

#[test]
fn non_finite_jacobian() {
    let (curve, noise) = setup(&[1.0, 2.0, 3.0]);
    let mut jacobian = DMatrix::from_element(3, 2, 1.0);
    jacobian[(2, 1)] = f64::INFINITY;
    let problem = MockProblem::new(vec![0.0; 3], jacobian);
    let limits = [RestrainLimit::FREE; 2];
    let result = Marquardt::new()
        .minimize(&curve, &problem, &noise, vec![0.5, 0.5], vec![0, 1], &limits)
        .unwrap();
    assert_eq!(
        result.status,
        FitStatus::Numerical("normal equations are not finite")
    );
    assert_eq!(result.iterations, 1);
    assert_eq!(problem.calls(), 1);
}

#[test]
fn stationary_point() {
    // the model does not react to its parameter at all
    let (curve, noise) = setup(&[1.0, 2.0, 3.0]);
    let problem = MockProblem::new(vec![2.0; 3], DMatrix::zeros(3, 1));
    let result = Marquardt::new()
        .minimize(&curve, &problem, &noise, vec![0.5], vec![0], &[RestrainLimit::FREE])
        .unwrap();
    assert_eq!(result.status, FitStatus::Numerical("covariance matrix is singular"));
    assert_eq!(result.params, vec![0.5]);
    assert_eq!(result.chisq, 2.0);
}

#[test]
fn only_free_parameters_move() {
    let (curve, noise) = setup(&[1.0, 2.0, 3.0]);
    let problem = MockProblem::new(vec![0.0; 3], DMatrix::from_element(3, 3, 1.0));
    let limits = [RestrainLimit::FREE; 3];
    let _ = Marquardt::new()
        .with_max_iterations(1)
        .minimize(&curve, &problem, &noise, vec![1.0, 2.0, 3.0], vec![1], &limits)
        .unwrap();
    for p in problem.params() {
        assert_eq!(p[0], 1.0);
        assert_eq!(p[2], 3.0);
    }
}

#[test]
fn poisson_weights_follow_the_fit() {
    // f = [p, 5 + p] against [4, 13]: the weighted mean of [4, 8] moves as
    // the weights 1/f change, and stays put under the starting weights
    let curve = DecayCurve::new(1.0, &[4.0, 13.0]).unwrap();
    let noise = NoiseModel::new(&curve, NoiseType::PoissonFit, &Sigma::Default).unwrap();
    let problem = MockProblem::new(vec![0.0, 5.0], DMatrix::from_element(2, 1, 1.0)).linear();
    let result = Marquardt::new()
        .with_max_iterations(2)
        .minimize(&curve, &problem, &noise, vec![1.0], vec![0], &[RestrainLimit::FREE])
        .unwrap();
    let trials = problem.params();
    assert_relative_eq!(trials[1][0], 4.567860710717853, epsilon = 1e-9);
    assert_relative_eq!(trials[2][0], 5.2924998992549295, epsilon = 1e-9);
    assert_eq!(result.params, trials[2]);
    assert_eq!(result.iterations, 2);
}
