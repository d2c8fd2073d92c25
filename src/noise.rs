//! Per-sample statistical weights.
//!
//! Every estimator measures the quality of a fit by the weighted chi-square
//! ```math
//!   \chi^2 = \sum_{i\in W} w_i\,(y_i - f_i)^2,\qquad w_i = \frac{1}{\sigma_i^2},
//! ```
//! over the fit window `$W$`. The [`NoiseType`] decides where `$\sigma_i$`
//! comes from.
use core::fmt;
use core::str::FromStr;
use std::borrow::Cow;

use num_traits::AsPrimitive;

use crate::curve::DecayCurve;
use crate::error::FitError;

/// Floor for the model value in maximum likelihood weights and deviance.
const MLE_FLOOR: f64 = 1.0e-10;

/// Noise model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoiseType {
    /// Unit weights.
    None,
    /// Constant sigma, either a scalar or one value per sample.
    Const,
    /// Caller-provided sigma for every sample.
    Given,
    /// `$\sigma_i^2 = \max(y_i, 1)$` from the measured counts.
    PoissonData,
    /// `$\sigma_i^2 = \max(f_i, 1)$` from the current fit, re-evaluated
    /// whenever the fit changes.
    #[default]
    PoissonFit,
    /// Recognised for compatibility but not implemented by any estimator.
    GaussianFit,
    /// Poisson maximum likelihood: the objective is the deviance instead of
    /// chi-square. Marquardt only.
    Mle,
}

impl NoiseType {
    pub fn token(&self) -> &'static str {
        match self {
            NoiseType::None => "NOISE_NONE",
            NoiseType::Const => "NOISE_CONST",
            NoiseType::Given => "NOISE_GIVEN",
            NoiseType::PoissonData => "NOISE_POISSON_DATA",
            NoiseType::PoissonFit => "NOISE_POISSON_FIT",
            NoiseType::GaussianFit => "NOISE_GAUSSIAN_FIT",
            NoiseType::Mle => "NOISE_MLE",
        }
    }

    /// Whether the weights have to be recomputed from every new fit.
    pub fn is_fit_dependent(&self) -> bool {
        matches!(self, NoiseType::PoissonFit | NoiseType::Mle)
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for NoiseType {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NOISE_NONE" => NoiseType::None,
            "NOISE_CONST" => NoiseType::Const,
            "NOISE_GIVEN" => NoiseType::Given,
            "NOISE_POISSON_DATA" => NoiseType::PoissonData,
            "NOISE_POISSON_FIT" => NoiseType::PoissonFit,
            "NOISE_GAUSSIAN_FIT" => NoiseType::GaussianFit,
            "NOISE_MLE" => NoiseType::Mle,
            other => return Err(FitError::UnknownNoiseType(other.into())),
        })
    }
}

/// The sigma argument accompanying a [`NoiseType`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Sigma {
    /// Nothing supplied.
    #[default]
    Default,
    /// One sigma for every sample.
    Scalar(f64),
    /// One sigma per sample.
    Values(Vec<f64>),
}

impl Sigma {
    pub fn values<T: AsPrimitive<f64>>(values: &[T]) -> Self {
        Sigma::Values(values.iter().map(|&v| v.as_()).collect())
    }
}

impl From<f64> for Sigma {
    fn from(sigma: f64) -> Self {
        Sigma::Scalar(sigma)
    }
}

impl From<Vec<f64>> for Sigma {
    fn from(sigma: Vec<f64>) -> Self {
        Sigma::Values(sigma)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Weighting {
    /// Weights known up front for every sample.
    Fixed(Vec<f64>),
    /// `1 / max(y, 1)` of whichever curve is passed in.
    Poisson,
    /// `1 / max(f, MLE_FLOOR)`.
    Likelihood,
}

/// A resolved noise model for one curve.
///
/// Built once per fit call. For fit-dependent noise types the estimators
/// ask for fresh weights with every new fitted curve.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    noise: NoiseType,
    weighting: Weighting,
}

impl NoiseModel {
    /// Resolve `noise` and `sigma` for `curve`.
    ///
    /// # Errors
    ///
    /// - [`FitError::UnsupportedNoiseType`] for [`NoiseType::GaussianFit`].
    /// - [`FitError::MissingSigma`] if [`NoiseType::Given`] comes without sigma.
    /// - [`FitError::SigmaLength`] if sigma has the wrong number of values.
    /// - [`FitError::InvalidSigma`] if a sigma is not positive and finite.
    pub fn new(curve: &DecayCurve, noise: NoiseType, sigma: &Sigma) -> Result<Self, FitError> {
        let n = curve.len();
        let weighting = match noise {
            NoiseType::None => {
                warn_ignored_sigma(noise, sigma);
                Weighting::Fixed(vec![1.0; n])
            }
            NoiseType::Const => {
                let sigmas = match sigma {
                    Sigma::Default => vec![1.0; n],
                    Sigma::Scalar(s) => vec![*s; n],
                    Sigma::Values(v) if v.len() == 1 => vec![v[0]; n],
                    Sigma::Values(v) if v.len() == n => v.clone(),
                    Sigma::Values(v) => {
                        return Err(FitError::SigmaLength {
                            expected: n,
                            got: v.len(),
                        })
                    }
                };
                Weighting::Fixed(inverse_variances(&sigmas)?)
            }
            NoiseType::Given => match sigma {
                Sigma::Default => return Err(FitError::MissingSigma(noise)),
                Sigma::Scalar(_) => {
                    return Err(FitError::SigmaLength {
                        expected: n,
                        got: 1,
                    })
                }
                Sigma::Values(v) if v.len() != n => {
                    return Err(FitError::SigmaLength {
                        expected: n,
                        got: v.len(),
                    })
                }
                Sigma::Values(v) => Weighting::Fixed(inverse_variances(v)?),
            },
            NoiseType::PoissonData => {
                warn_ignored_sigma(noise, sigma);
                Weighting::Fixed(curve.samples().iter().map(|&y| poisson(y)).collect())
            }
            NoiseType::PoissonFit => {
                warn_ignored_sigma(noise, sigma);
                Weighting::Poisson
            }
            NoiseType::Mle => {
                warn_ignored_sigma(noise, sigma);
                Weighting::Likelihood
            }
            NoiseType::GaussianFit => {
                return Err(FitError::UnsupportedNoiseType {
                    noise,
                    estimator: "any estimator",
                })
            }
        };
        Ok(Self { noise, weighting })
    }

    pub fn noise_type(&self) -> NoiseType {
        self.noise
    }

    pub fn is_fit_dependent(&self) -> bool {
        self.noise.is_fit_dependent()
    }

    /// Inverse-variance weight of every sample, given the current fit.
    ///
    /// `fitted` is only read by fit-dependent noise types.
    pub fn weights<'a>(&'a self, fitted: &[f64]) -> Cow<'a, [f64]> {
        match &self.weighting {
            Weighting::Fixed(w) => Cow::Borrowed(w),
            Weighting::Poisson => Cow::Owned(fitted.iter().map(|&f| poisson(f)).collect()),
            Weighting::Likelihood => Cow::Owned(
                fitted
                    .iter()
                    .map(|&f| 1.0 / f64::max(f, MLE_FLOOR))
                    .collect(),
            ),
        }
    }

    /// Objective value of `fitted` against `curve` over the fit window.
    ///
    /// Weighted chi-square for every noise type except
    /// [`NoiseType::Mle`], which yields the Poisson deviance
    /// ```math
    ///   D = 2\sum_{i\in W}\Bigl[f_i - y_i - y_i\ln\frac{f_i}{y_i}\Bigr].
    /// ```
    /// Non-positive model values make the deviance infinite.
    pub fn chisq(&self, curve: &DecayCurve, fitted: &[f64]) -> f64 {
        let range = curve.fit_range();
        let observed = &curve.samples()[range.clone()];
        let fitted = &fitted[range.clone()];
        match &self.weighting {
            Weighting::Likelihood => {
                let mut deviance = 0.0;
                for (&y, &f) in observed.iter().zip(fitted) {
                    if f <= 0.0 {
                        if y > 0.0 || f < 0.0 {
                            return f64::INFINITY;
                        }
                        continue;
                    }
                    deviance += f - y;
                    if y > 0.0 {
                        deviance -= y * (f / y).ln();
                    }
                }
                2.0 * deviance
            }
            Weighting::Fixed(w) => weighted_squares(observed, fitted, &w[range]),
            Weighting::Poisson => {
                let w: Vec<f64> = fitted.iter().map(|&f| poisson(f)).collect();
                weighted_squares(observed, fitted, &w)
            }
        }
    }
}

/// Inverse-variance weights for `values` under `noise`.
///
/// For fit-dependent noise types `values` is the fitted curve; otherwise it
/// is the measured curve.
pub fn compute_weights(
    values: &[f64],
    noise: NoiseType,
    sigma: &Sigma,
) -> Result<Vec<f64>, FitError> {
    let curve = DecayCurve::new(1.0, values)?;
    let model = NoiseModel::new(&curve, noise, sigma)?;
    Ok(model.weights(values).into_owned())
}

fn weighted_squares(observed: &[f64], fitted: &[f64], weights: &[f64]) -> f64 {
    observed
        .iter()
        .zip(fitted)
        .zip(weights)
        .map(|((y, f), w)| w * (y - f) * (y - f))
        .sum()
}

fn poisson(counts: f64) -> f64 {
    1.0 / f64::max(counts, 1.0)
}

fn inverse_variances(sigmas: &[f64]) -> Result<Vec<f64>, FitError> {
    sigmas
        .iter()
        .enumerate()
        .map(|(index, &s)| {
            if s.is_finite() && s > 0.0 {
                Ok(1.0 / (s * s))
            } else {
                Err(FitError::InvalidSigma { index, value: s })
            }
        })
        .collect()
}

fn warn_ignored_sigma(noise: NoiseType, sigma: &Sigma) {
    if *sigma != Sigma::Default {
        log::warn!("sigma argument is ignored with noise type {}", noise);
    }
}
