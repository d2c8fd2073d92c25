//! Lifetime from the first Fourier harmonic of the decay.
//!
//! With `$\omega = 2\pi/(n h)$` for a window of `$n$` bins of width `$h$`
//! and bin centres `$t_i = (i + \tfrac12)h$` relative to the window start,
//! ```math
//!   g = \frac{\sum_i y_i\cos\omega t_i}{\sum_i y_i},\qquad
//!   s = \frac{\sum_i y_i\sin\omega t_i}{\sum_i y_i}.
//! ```
//! A single exponential lies on the universal semicircle, where the phase
//! and modulation lifetimes
//! ```math
//!   \tau_\phi = \frac{s}{\omega g},\qquad
//!   \tau_m = \frac{1}{\omega}\sqrt{\frac{1}{g^2 + s^2} - 1}
//! ```
//! agree. For anything else they differ and the apparent lifetime is their
//! mean.
use core::f64::consts::PI;

use crate::curve::{DecayCurve, InstrumentResponse};
use crate::error::{FitError, FitStatus};
use crate::noise::{NoiseModel, NoiseType, Sigma};

/// Result of the [`Phasor`] estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasorResult {
    pub g: f64,
    pub s: f64,
    pub tau_phase: f64,
    pub tau_modulation: f64,
    /// Apparent lifetime, the mean of `tau_phase` and `tau_modulation`.
    pub tau: f64,
    /// Amplitude of the reconstructed decay.
    pub a: f64,
    /// `$A e^{-t/\tau}$` at every sample, convolved with the instrument
    /// response if one is set.
    pub fitted: Vec<f64>,
    /// `observed - fitted` at every sample.
    pub residuals: Vec<f64>,
    /// Chi-square of the reconstruction with Poisson weights from the fit.
    pub chisq: f64,
    pub status: FitStatus,
    degrees_of_freedom: usize,
}

impl PhasorResult {
    pub fn reduced_chisq(&self) -> f64 {
        self.chisq / self.degrees_of_freedom as f64
    }
}

/// Phasor estimator. The fit window of the curve selects the samples that
/// enter the transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Phasor {
    instrument: Option<InstrumentResponse>,
}

impl Phasor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convolve the reconstructed decay with `instrument` before matching
    /// its intensity to the window. The transform itself is unchanged.
    pub fn with_instrument_response(self, instrument: Option<InstrumentResponse>) -> Self {
        Self { instrument }
    }

    /// Transform `curve` and reconstruct a single exponential from the
    /// apparent lifetime.
    ///
    /// # Errors
    ///
    /// [`FitError::ZeroIntensity`] if the samples in the fit window sum to
    /// zero. A phasor off the physical region, where no positive lifetime
    /// exists, is reported through the result's `status`.
    pub fn fit(&self, curve: &DecayCurve) -> Result<PhasorResult, FitError> {
        let range = curve.fit_range();
        let h = curve.period();
        let omega = 2.0 * PI / (range.len() as f64 * h);

        let mut intensity = 0.0;
        let mut cos_sum = 0.0;
        let mut sin_sum = 0.0;
        for (k, &y) in curve.samples()[range.clone()].iter().enumerate() {
            let (sin, cos) = (omega * (k as f64 + 0.5) * h).sin_cos();
            intensity += y;
            cos_sum += y * cos;
            sin_sum += y * sin;
        }
        if intensity == 0.0 {
            return Err(FitError::ZeroIntensity);
        }
        let g = cos_sum / intensity;
        let s = sin_sum / intensity;

        let tau_phase = s / (omega * g);
        let tau_modulation = (1.0 / (g * g + s * s) - 1.0).sqrt() / omega;
        let tau = 0.5 * (tau_phase + tau_modulation);
        log::debug!("phasor g {g} s {s}: tau_phase {tau_phase} tau_modulation {tau_modulation}");

        let degrees_of_freedom = curve.fit_len().saturating_sub(2).max(1);
        let failed = |status| PhasorResult {
            g,
            s,
            tau_phase,
            tau_modulation,
            tau,
            a: f64::NAN,
            fitted: vec![f64::NAN; curve.len()],
            residuals: vec![f64::NAN; curve.len()],
            chisq: f64::NAN,
            status,
            degrees_of_freedom,
        };
        if !(tau.is_finite() && tau > 0.0) {
            return Ok(failed(FitStatus::Numerical(
                "phasor lies outside the single exponential region",
            )));
        }

        let decay: Vec<f64> = (0..curve.len())
            .map(|i| (-curve.time(i) / tau).exp())
            .collect();
        let shape = match &self.instrument {
            Some(irf) => irf.convolve(&decay),
            None => decay,
        };
        let window: f64 = shape[range].iter().sum();
        if !(window > 0.0) {
            return Ok(failed(FitStatus::Numerical(
                "reconstructed decay is empty in the fit window",
            )));
        }
        let a = intensity / window;
        let fitted: Vec<f64> = shape.iter().map(|e| a * e).collect();
        let noise = NoiseModel::new(curve, NoiseType::PoissonFit, &Sigma::Default)?;
        let chisq = noise.chisq(curve, &fitted);

        Ok(PhasorResult {
            g,
            s,
            tau_phase,
            tau_modulation,
            tau,
            a,
            residuals: curve.residuals(&fitted),
            fitted,
            chisq,
            status: FitStatus::Converged,
            degrees_of_freedom,
        })
    }
}
