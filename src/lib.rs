//! Fluorescence lifetime fitting of time-resolved photon count histograms
//! using [nalgebra](https://nalgebra.org).
//!
//! A decay curve `$y_0, \ldots, y_{N-1}$` is sampled every `$h$` time units,
//! `$t_i = i h$`. The crate fits models of the form
//! ```math
//!   f(t) = Z + \sum_{j} A_j\, e^{-t/\tau_j}
//! ```
//! (and arbitrary user models) to such curves by minimizing the weighted
//! chi-square
//! ```math
//!   \chi^2 = \sum_{i\in W} w_i\,\bigl(y_i - f(t_i)\bigr)^2
//! ```
//! over a fit window `$W$`. The weights `$w_i = 1/\sigma_i^2$` follow from the
//! selected [`NoiseType`].
//!
//! # Estimators
//!
//! - [`TripleIntegral`] is a closed-form single exponential estimate from
//!   three region integrals. It needs no initial guess and is a good source
//!   of one for the other estimators.
//! - [`Marquardt`] is a Levenberg-Marquardt solver for any [`FitFunction`]
//!   with fixed parameters and box constraints.
//! - [`Phasor`] transforms the curve to its first Fourier harmonic and
//!   reads an apparent lifetime off the phasor, without iterating.
//! - [`Bayes`] treats the curve as a histogram of photon arrivals and
//!   reports the posterior mean and spread of a single exponential with
//!   background.
//!
//! Every estimator returns a result record with the fitted curve,
//! the residuals, chi-square and a [`FitStatus`]. Malformed input is rejected
//! with a [`FitError`] before any numeric work starts.
//!
//! # Usage Example
//!
//! ```
//! use flim_fit::{DecayCurve, Marquardt, TripleIntegral};
//!
//! let period = 0.04;
//! let samples: Vec<f32> = (0..256)
//!     .map(|i| 10.0 * (-(i as f32) * period / 2.0).exp())
//!     .collect();
//! let curve = DecayCurve::new(period as f64, &samples)?;
//!
//! let estimate = TripleIntegral::new().fit(&curve)?;
//! let result = Marquardt::new().fit(&curve, &estimate.params())?;
//! assert!(result.status.is_success());
//! assert!((result.params[2] - 2.0).abs() < 0.05);
//! # Ok::<(), flim_fit::FitError>(())
//! ```
//!
//! # Constraints
//!
//! [`Marquardt::with_free_mask`] holds parameters at their initial value.
//! Box constraints come from the fit function
//! ([`RestrainType::Default`]) or from a [`RestrainSet`]
//! ([`RestrainType::User`]), either passed to the solver directly or
//! configured process-wide with [`set_restrain_limits`].
//!
//! # Derivative checking
//!
//! The analytic gradient of a custom [`FitFunction`] can be compared with
//! [`differentiate_numerically`].
use num_traits::AsPrimitive;

mod bayes;
mod curve;
mod error;
mod fit_function;
mod lm;
mod noise;
mod phasor;
mod problem;
mod restrain;
mod triple_integral;
mod utils;

pub use bayes::{Bayes, BayesResult};
pub use curve::{DecayCurve, InstrumentResponse};
pub use error::{ErrorKind, FitError, FitStatus};
pub use fit_function::{FitFunction, MultiExpLambda, MultiExpTau, StretchedExp, UserFitFunction};
pub use lm::{Marquardt, MarquardtResult};
pub use noise::{compute_weights, NoiseModel, NoiseType, Sigma};
pub use phasor::{Phasor, PhasorResult};
pub use restrain::{
    reset_restrain_limits, restrain_limits, set_restrain_limits, RestrainKind, RestrainLimit,
    RestrainSet, RestrainType,
};
pub use triple_integral::{triple_integral, DecayEstimate, TripleIntegral, TripleIntegralResult};

pub use utils::differentiate_numerically;

/// Triple integral fit of `samples` with default settings.
///
/// Shorthand for [`TripleIntegral::fit`] on a [`DecayCurve`] built from
/// `period` and `samples`.
pub fn triple_integral_fit<T: AsPrimitive<f64>>(
    period: f64,
    samples: &[T],
) -> Result<TripleIntegralResult, FitError> {
    TripleIntegral::new().fit(&DecayCurve::new(period, samples)?)
}

/// Marquardt fit of a [`MultiExpTau`] model with default settings.
pub fn marquardt_fit<T, U>(
    period: f64,
    samples: &[T],
    initial: &[U],
) -> Result<MarquardtResult, FitError>
where
    T: AsPrimitive<f64>,
    U: AsPrimitive<f64>,
{
    Marquardt::new().fit(&DecayCurve::new(period, samples)?, initial)
}

/// Phasor estimate of `samples`.
pub fn phasor_fit<T: AsPrimitive<f64>>(period: f64, samples: &[T]) -> Result<PhasorResult, FitError> {
    Phasor::new().fit(&DecayCurve::new(period, samples)?)
}

/// Bayesian estimate of `samples`; `initial` is only read for parameters
/// held by a free mask, so with the defaults any three values will do.
pub fn bayes_fit<T, U>(period: f64, samples: &[T], initial: &[U]) -> Result<BayesResult, FitError>
where
    T: AsPrimitive<f64>,
    U: AsPrimitive<f64>,
{
    Bayes::new().fit(&DecayCurve::new(period, samples)?, initial)
}
