//! Fits of synthetic decays with known parameters.
use approx::assert_relative_eq;

use super::test_helpers::*;
use crate::curve::{DecayCurve, InstrumentResponse};
use crate::error::{FitError, FitStatus};
use crate::fit_function::{FitFunction, MultiExpLambda, MultiExpTau, StretchedExp, UserFitFunction};
use crate::noise::{NoiseType, Sigma};
use crate::Marquardt;

#[test]
fn test_single_exponential() {
    let curve = reference_curve();
    let result = Marquardt::new().fit(&curve, &[0.0, A + 1.0, TAU + 1.0]).unwrap();
    assert!(result.status.is_success(), "{:?}", result.status);
    assert_relative_eq!(result.params[0], 0.0, epsilon = 0.05);
    assert_relative_eq!(result.params[1], A, epsilon = 0.05);
    assert_relative_eq!(result.params[2], TAU, epsilon = 0.05);
    assert_relative_eq!(result.fitted[0], A, epsilon = 0.05);
    assert!(result.residuals.iter().all(|r| r.abs() < 0.05));
    assert!(result.chisq < 1e-3);
    assert!(result.iterations <= 100);
}

#[test]
fn test_accepts_f64_input() {
    let samples: Vec<f64> = decay_f32(A, TAU, PERIOD, SAMPLES)
        .into_iter()
        .map(f64::from)
        .collect();
    let curve = DecayCurve::new(PERIOD, &samples).unwrap();
    let wide = Marquardt::new().fit(&curve, &[0.0f32, 11.0, 3.0]).unwrap();
    let narrow = Marquardt::new()
        .fit(&reference_curve(), &[0.0, 11.0, 3.0])
        .unwrap();
    assert_eq!(wide.params, narrow.params);
}

#[test]
fn test_multiexp_lambda() {
    let curve = reference_curve();
    let result = Marquardt::new()
        .fit_with(&curve, &[0.0, A + 1.0, 1.0 / TAU + 1.0], &MultiExpLambda)
        .unwrap();
    assert!(result.status.is_success());
    assert_relative_eq!(result.params[1], A, epsilon = 0.05);
    assert_relative_eq!(result.params[2], 1.0 / TAU, epsilon = 0.05);
}

#[test]
fn test_user_fit_function() {
    let exp_tau = UserFitFunction::new(
        |t, p: &[f64], dy: &mut [f64]| {
            let e = (-t / p[2]).exp();
            dy[0] = 1.0;
            dy[1] = e;
            dy[2] = p[1] * t * e / (p[2] * p[2]);
            p[0] + p[1] * e
        },
        |n| n == 3,
    );
    let result = Marquardt::new()
        .fit_with(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0], &exp_tau)
        .unwrap();
    assert_relative_eq!(result.params[0], 0.0, epsilon = 0.05);
    assert_relative_eq!(result.params[1], A, epsilon = 0.05);
    assert_relative_eq!(result.params[2], TAU, epsilon = 0.05);
}

#[test]
fn test_user_linear_model() {
    // the offset is reported to the solver but never used by the model
    let line = UserFitFunction::new(
        |t, p: &[f64], dy: &mut [f64]| {
            dy[0] = 1.0;
            dy[1] = t;
            p[1] * t
        },
        |n| n == 2,
    );
    let samples: Vec<f32> = (0..SAMPLES).map(|i| (i as f64 * PERIOD) as f32).collect();
    let curve = DecayCurve::new(PERIOD, &samples).unwrap();
    let result = Marquardt::new()
        .with_noise(NoiseType::Const, Sigma::Scalar(1.0))
        .fit_with(&curve, &[0.0, 2.0], &line)
        .unwrap();
    assert_relative_eq!(result.params[0], 0.0, epsilon = 0.05);
    assert_relative_eq!(result.params[1], 1.0, epsilon = 0.05);
}

#[test]
fn test_constant_model_is_the_weighted_mean() {
    let level = UserFitFunction::new(
        |_, p: &[f64], dy: &mut [f64]| {
            dy[0] = 1.0;
            p[0]
        },
        |n| n == 1,
    );
    let curve = DecayCurve::new(1.0, &[1.0, 2.0, 3.0, 6.0]).unwrap();
    let result = Marquardt::new()
        .with_noise(NoiseType::Given, Sigma::values(&[1.0, 1.0, 1.0, 0.5]))
        .fit_with(&curve, &[0.0], &level)
        .unwrap();
    // weights 1, 1, 1, 4
    assert_relative_eq!(result.params[0], 30.0 / 7.0, epsilon = 1e-9);
    assert_relative_eq!(result.covariance[(0, 0)], 1.0 / 7.0, epsilon = 1e-9);
    assert_relative_eq!(result.standard_errors()[0], (1.0f64 / 7.0).sqrt(), epsilon = 1e-9);
}

#[test]
fn test_param_count() {
    let curve = reference_curve();
    assert_eq!(
        Marquardt::new().fit(&curve, &[A + 1.0, TAU + 1.0]),
        Err(FitError::ModelArity(2))
    );
    assert_eq!(
        Marquardt::new().fit(&curve, &[0.0; 4]).unwrap_err().kind(),
        crate::error::ErrorKind::ModelArity
    );
    let result = Marquardt::new()
        .fit(&curve, &[0.0, A + 1.0, TAU + 1.0, 1.0, 1.0])
        .unwrap();
    assert_eq!(result.params.len(), 5);
    assert_eq!(result.covariance.shape(), (5, 5));
    assert_eq!(
        Marquardt::new().fit_with(&curve, &[0.0, 1.0, 1.0], &StretchedExp),
        Err(FitError::ModelArity(3))
    );
}

#[test]
fn test_two_components() {
    let samples: Vec<f64> = (0..SAMPLES)
        .map(|i| {
            let t = i as f64 * PERIOD;
            0.5 + 8.0 * (-t / 0.5).exp() + 4.0 * (-t / 3.0).exp()
        })
        .collect();
    let curve = DecayCurve::new(PERIOD, &samples).unwrap();
    let result = Marquardt::new()
        .with_noise(NoiseType::Const, Sigma::Default)
        .with_max_iterations(500)
        .fit(&curve, &[0.0, 6.0, 0.8, 6.0, 2.0])
        .unwrap();
    assert!(result.status.is_success(), "{:?}", result.status);
    assert_relative_eq!(result.params[0], 0.5, epsilon = 1e-2);
    assert_relative_eq!(result.params[2], 0.5, epsilon = 1e-2);
    assert_relative_eq!(result.params[4], 3.0, epsilon = 1e-2);
}

#[test]
fn test_poisson_counts() {
    let curve = poisson_curve(1000.0, 2.5, 5.0, 0.05, 256, 7);
    let result = Marquardt::new().fit(&curve, &[0.0, 800.0, 2.0]).unwrap();
    assert!(result.status.is_success());
    assert_relative_eq!(result.params[2], 2.5, max_relative = 0.05);
    // reduced chi-square of a correct model under Poisson noise is near one
    assert!(result.reduced_chisq() > 0.6 && result.reduced_chisq() < 1.5);
    let errors = result.standard_errors();
    assert!(errors[2] > 0.0 && errors[2] < 0.2);
}

#[test]
fn test_maximum_likelihood() {
    let curve = poisson_curve(50.0, 1.5, 1.0, 0.05, 200, 11);
    let result = Marquardt::new()
        .with_noise(NoiseType::Mle, Sigma::Default)
        .fit(&curve, &[0.0, 40.0, 1.0])
        .unwrap();
    assert!(result.status.is_success());
    assert_relative_eq!(result.params[2], 1.5, max_relative = 0.2);
    // at the optimum the model conserves the total count
    let fitted: f64 = result.fitted.iter().sum();
    let observed: f64 = curve.samples().iter().sum();
    assert_relative_eq!(fitted, observed, max_relative = 1e-3);
}

#[test]
fn test_chisq_target_stops_early() {
    let curve = reference_curve();
    let full = Marquardt::new()
        .with_noise(NoiseType::Const, Sigma::Default)
        .fit(&curve, &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    let early = Marquardt::new()
        .with_noise(NoiseType::Const, Sigma::Default)
        .with_chisq_target(1.0)
        .fit(&curve, &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_eq!(early.status, FitStatus::Converged);
    assert!(early.reduced_chisq() < 1.0);
    assert!(early.iterations <= full.iterations);
}

#[test]
fn test_start_meeting_the_target() {
    let initial = [0.0, A, TAU + 0.01];
    let result = Marquardt::new()
        .with_chisq_target(10.0)
        .fit(&reference_curve(), &initial)
        .unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.params, initial);
    assert!(result.reduced_chisq() < 10.0);
}

#[test]
fn test_lost_patience() {
    let result = Marquardt::new()
        .with_max_iterations(1)
        .fit(&reference_curve(), &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_eq!(result.iterations, 1);
    assert_eq!(result.status, FitStatus::LostPatience);
    assert_eq!(result.status.code(), 2);
}

#[test]
fn test_fit_window() {
    let mut samples = decay_f32(A, TAU, PERIOD, SAMPLES);
    // rising edge and a pile-up tail outside the window
    samples[..5].fill(0.0);
    samples[250..].fill(100.0);
    let curve = DecayCurve::new(PERIOD, &samples)
        .unwrap()
        .with_fit_range(5, 250)
        .unwrap();
    let result = Marquardt::new()
        .with_noise(NoiseType::Const, Sigma::Default)
        .fit(&curve, &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_relative_eq!(result.params[1], A, epsilon = 1e-3);
    assert_relative_eq!(result.params[2], TAU, epsilon = 1e-3);
    assert_eq!(result.fitted.len(), SAMPLES);
    assert_relative_eq!(result.residuals[255], 100.0 - result.fitted[255]);
}

#[test]
fn test_instrument_response() {
    let irf = [0.2, 0.6, 0.2];
    let instrument = InstrumentResponse::new(&irf).unwrap();
    let plain: Vec<f64> = decay_f32(A, TAU, PERIOD, SAMPLES)
        .into_iter()
        .map(f64::from)
        .collect();
    let measured = instrument.as_ref().unwrap().convolve(&plain);
    let curve = DecayCurve::new(PERIOD, &measured).unwrap();
    let result = Marquardt::new()
        .with_noise(NoiseType::Const, Sigma::Default)
        .with_instrument_response(instrument)
        .fit(&curve, &[0.0, A + 1.0, TAU + 1.0])
        .unwrap();
    assert_relative_eq!(result.params[1], A, epsilon = 1e-3);
    assert_relative_eq!(result.params[2], TAU, epsilon = 1e-3);
}

#[test]
fn test_boxed_model() {
    let model: Box<dyn FitFunction> = Box::new(MultiExpTau);
    let boxed = Marquardt::new()
        .fit_with(&reference_curve(), &[0.0, 11.0, 3.0], &model)
        .unwrap();
    let direct = Marquardt::new()
        .fit(&reference_curve(), &[0.0, 11.0, 3.0])
        .unwrap();
    assert_eq!(boxed, direct);
}

#[test]
fn test_validation() {
    let curve = reference_curve();
    let empty: [f64; 0] = [];
    assert_eq!(Marquardt::new().fit(&curve, &empty), Err(FitError::NoParameters));
    assert!(matches!(
        Marquardt::new().fit(&curve, &[0.0, f64::NAN, 1.0]),
        Err(FitError::NonFinite { index: 1, .. })
    ));
    assert_eq!(
        Marquardt::new()
            .with_free_mask(vec![true, false])
            .fit(&curve, &[0.0, 1.0, 1.0]),
        Err(FitError::FreeMaskLength {
            expected: 3,
            got: 2
        })
    );
    let err = Marquardt::new()
        .with_noise(NoiseType::GaussianFit, Sigma::Default)
        .fit(&curve, &[0.0, 1.0, 1.0])
        .unwrap_err();
    assert!(err.is_validation());
    let err = Marquardt::new()
        .with_noise(NoiseType::Given, Sigma::values(&[1.0; 5]))
        .fit(&curve, &[0.0, 1.0, 1.0])
        .unwrap_err();
    assert_eq!(
        err,
        FitError::SigmaLength {
            expected: SAMPLES,
            got: 5
        }
    );
}
