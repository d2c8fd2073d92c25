//! Closed-form single exponential fit from three region integrals.
//!
//! For `$y(t) = A e^{-t/\tau} + Z$` split the fit window into three
//! consecutive regions of width `$w$` and integrate each one:
//! ```math
//!   I_k = \int_{t_k}^{t_k + w} y\,dt,\qquad
//!   r = \frac{I_1 - I_2}{I_0 - I_1} = e^{-w/\tau}.
//! ```
//! So `$\tau = -w/\ln r$`, and with `$\tau$` known `$A$` and `$Z$` follow
//! from a linear relation. The integrals are trapezoidal sums; the same sums
//! of `$e^{-t/\tau}$` are used to recover `$A$` and `$Z$`, so a noiseless
//! decay is reproduced exactly.
use crate::curve::{DecayCurve, InstrumentResponse};
use crate::error::{FitError, FitStatus};
use crate::noise::{NoiseModel, NoiseType, Sigma};
use crate::utils::trapezoid;

/// Closed-form estimate of a single exponential with offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayEstimate {
    pub a: f64,
    pub tau: f64,
    pub z: f64,
}

impl DecayEstimate {
    /// Model value at every sample of `curve`, optionally convolved.
    pub fn curve(&self, curve: &DecayCurve, instrument: Option<&InstrumentResponse>) -> Vec<f64> {
        let model: Vec<f64> = (0..curve.len())
            .map(|i| self.a * (-curve.time(i) / self.tau).exp() + self.z)
            .collect();
        match instrument {
            Some(irf) => irf.convolve(&model),
            None => model,
        }
    }
}

/// Estimate `$A$`, `$\tau$` and `$Z$` using the first three of `division`
/// equal regions of the fit window.
///
/// Returns `None` if the regions are shorter than one sample or the
/// integrals do not describe a decay (`$r \notin (0, 1)$`).
pub fn triple_integral(curve: &DecayCurve, division: usize) -> Option<DecayEstimate> {
    let range = curve.fit_range();
    if division < 3 {
        return None;
    }
    let width = (range.len() - 1) / division;
    if width == 0 {
        return None;
    }
    let h = curve.period();
    let bounds = |k: usize| (range.start + k * width, range.start + (k + 1) * width);
    let integrals = |values: &[f64]| {
        let mut out = [0.0; 3];
        for (k, o) in out.iter_mut().enumerate() {
            let (from, to) = bounds(k);
            *o = trapezoid(values, from, to, h);
        }
        out
    };

    let i = integrals(curve.samples());
    let d1 = i[0] - i[1];
    let d2 = i[1] - i[2];
    if d1 == 0.0 {
        return None;
    }
    let ratio = d2 / d1;
    if !(ratio > 0.0 && ratio < 1.0) {
        return None;
    }
    let span = width as f64 * h;
    let tau = -span / ratio.ln();

    let decay: Vec<f64> = (0..range.end)
        .map(|i| (-curve.time(i) / tau).exp())
        .collect();
    let s = integrals(&decay);
    let a = d1 / (s[0] - s[1]);
    let z = (i[0] - a * s[0]) / span;
    let estimate = DecayEstimate { a, tau, z };
    (a.is_finite() && tau.is_finite() && z.is_finite()).then_some(estimate)
}

/// Result of the triple integral estimator.
///
/// When `status` is a numerical failure no try produced an estimate and
/// every number is NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct TripleIntegralResult {
    pub a: f64,
    pub tau: f64,
    pub z: f64,
    /// Model at every sample.
    pub fitted: Vec<f64>,
    /// `observed - fitted` at every sample.
    pub residuals: Vec<f64>,
    pub chisq: f64,
    /// Number of closed-form evaluations performed.
    pub tries: usize,
    pub status: FitStatus,
    degrees_of_freedom: usize,
}

impl TripleIntegralResult {
    /// Parameters in the `[Z, A, tau]` layout of
    /// [`MultiExpTau`](struct.MultiExpTau.html).
    pub fn params(&self) -> [f64; 3] {
        [self.z, self.a, self.tau]
    }

    pub fn reduced_chisq(&self) -> f64 {
        self.chisq / self.degrees_of_freedom as f64
    }
}

/// Triple integral estimator with a bounded refinement loop.
///
/// The closed-form estimate is not guaranteed to reach a chi-square target.
/// While the reduced chi-square is not below the target the estimator
/// retries with one more division of the fit window, which moves the three
/// regions toward the bright early part of the decay. It stops after
/// `max_tries` evaluations and returns the best estimate found.
#[derive(Debug, Clone, PartialEq)]
pub struct TripleIntegral {
    chisq_target: f64,
    max_tries: usize,
    noise: NoiseType,
    sigma: Sigma,
    instrument: Option<InstrumentResponse>,
}

impl TripleIntegral {
    pub fn new() -> Self {
        Self {
            chisq_target: 1.0,
            max_tries: 10,
            noise: NoiseType::default(),
            sigma: Sigma::Default,
            instrument: None,
        }
    }

    /// Set the reduced chi-square the fit has to fall below.
    ///
    /// A target of zero can never be met and makes the estimator spend
    /// its whole retry budget.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{chisq\_target} < 0$` or NaN.
    pub fn with_chisq_target(self, chisq_target: f64) -> Self {
        assert!(chisq_target >= 0.0, "chisq_target must be >= 0");
        Self {
            chisq_target,
            ..self
        }
    }

    /// Set the maximal number of closed-form evaluations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_tries} = 0$`.
    pub fn with_max_tries(self, max_tries: usize) -> Self {
        assert!(max_tries > 0, "max_tries must be > 0");
        Self { max_tries, ..self }
    }

    pub fn with_noise(self, noise: NoiseType, sigma: Sigma) -> Self {
        Self {
            noise,
            sigma,
            ..self
        }
    }

    pub fn with_instrument_response(self, instrument: Option<InstrumentResponse>) -> Self {
        Self { instrument, ..self }
    }

    /// Fit `curve`.
    ///
    /// # Errors
    ///
    /// Only validation errors of the noise configuration;
    /// [`NoiseType::Mle`] is not supported. Numerical trouble is reported
    /// through the result's `status`.
    pub fn fit(&self, curve: &DecayCurve) -> Result<TripleIntegralResult, FitError> {
        if self.noise == NoiseType::Mle {
            return Err(FitError::UnsupportedNoiseType {
                noise: self.noise,
                estimator: "the triple integral estimator",
            });
        }
        let noise = NoiseModel::new(curve, self.noise, &self.sigma)?;
        let degrees_of_freedom = curve.fit_len().saturating_sub(3).max(1);

        let mut best: Option<(DecayEstimate, Vec<f64>, f64)> = None;
        let mut reached = false;
        let mut tries = 0;
        let mut division = 3;
        while tries < self.max_tries {
            if (curve.fit_len() - 1) / division == 0 {
                break;
            }
            tries += 1;
            match triple_integral(curve, division) {
                Some(estimate) => {
                    let fitted = estimate.curve(curve, self.instrument.as_ref());
                    let chisq = noise.chisq(curve, &fitted);
                    log::debug!(
                        "triple integral try {tries} (division {division}): tau {} chisq {chisq}",
                        estimate.tau
                    );
                    if chisq.is_finite() && best.as_ref().map_or(true, |b| chisq < b.2) {
                        best = Some((estimate, fitted, chisq));
                    }
                    if chisq / (degrees_of_freedom as f64) < self.chisq_target {
                        reached = true;
                        break;
                    }
                }
                None => log::debug!("triple integral try {tries} (division {division}) is degenerate"),
            }
            division += 1;
        }

        let result = match best {
            Some((estimate, fitted, chisq)) => TripleIntegralResult {
                a: estimate.a,
                tau: estimate.tau,
                z: estimate.z,
                residuals: curve.residuals(&fitted),
                fitted,
                chisq,
                tries,
                status: if reached {
                    FitStatus::Converged
                } else {
                    FitStatus::TargetNotReached
                },
                degrees_of_freedom,
            },
            None => TripleIntegralResult {
                a: f64::NAN,
                tau: f64::NAN,
                z: f64::NAN,
                fitted: vec![f64::NAN; curve.len()],
                residuals: vec![f64::NAN; curve.len()],
                chisq: f64::NAN,
                tries,
                status: FitStatus::Numerical("triple integral is degenerate"),
                degrees_of_freedom,
            },
        };
        Ok(result)
    }
}

impl Default for TripleIntegral {
    fn default() -> Self {
        Self::new()
    }
}
