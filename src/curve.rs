//! Validated inputs shared by all estimators.
use core::ops::Range;

use num_traits::AsPrimitive;

use crate::error::FitError;
use crate::utils::convolve;

/// A fluorescence decay sampled every `period` seconds.
///
/// Samples are converted to `f64` once on construction, regardless of the
/// precision the caller measured them in. The fit window defaults to the
/// whole curve and can be narrowed with [`with_fit_range`](#method.with_fit_range).
#[derive(Debug, Clone, PartialEq)]
pub struct DecayCurve {
    period: f64,
    samples: Vec<f64>,
    window: Range<usize>,
}

impl DecayCurve {
    /// # Errors
    ///
    /// Fails with a validation error if `period` is not positive and finite,
    /// if there are fewer than two samples or if a sample is not finite.
    pub fn new<T: AsPrimitive<f64>>(period: f64, samples: &[T]) -> Result<Self, FitError> {
        if !(period.is_finite() && period > 0.0) {
            return Err(FitError::InvalidPeriod(period));
        }
        if samples.len() < 2 {
            return Err(FitError::CurveTooShort(samples.len()));
        }
        let samples: Vec<f64> = samples.iter().map(|&s| s.as_()).collect();
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(FitError::NonFinite {
                what: "decay curve",
                index,
            });
        }
        let window = 0..samples.len();
        Ok(Self {
            period,
            samples,
            window,
        })
    }

    /// Restrict chi-square, weights and the estimators' integrals to
    /// `start..end`.
    ///
    /// The fitted curve and the residuals still cover every sample.
    pub fn with_fit_range(self, start: usize, end: usize) -> Result<Self, FitError> {
        if start >= end || end > self.samples.len() || end - start < 2 {
            return Err(FitError::InvalidFitRange {
                start,
                end,
                len: self.samples.len(),
            });
        }
        Ok(Self {
            window: start..end,
            ..self
        })
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn fit_range(&self) -> Range<usize> {
        self.window.clone()
    }

    /// Number of samples inside the fit window.
    pub fn fit_len(&self) -> usize {
        self.window.len()
    }

    /// Time of sample `i`, measured from the first sample of the curve.
    pub fn time(&self, i: usize) -> f64 {
        i as f64 * self.period
    }

    /// `observed - fitted` over the whole curve.
    pub(crate) fn residuals(&self, fitted: &[f64]) -> Vec<f64> {
        self.samples
            .iter()
            .zip(fitted)
            .map(|(y, f)| y - f)
            .collect()
    }
}

/// System impulse response, normalised to unit sum.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentResponse {
    kernel: Vec<f64>,
}

impl InstrumentResponse {
    /// Returns `Ok(None)` for an empty response, meaning no convolution.
    ///
    /// # Errors
    ///
    /// Fails with a validation error if a value is not finite or the values
    /// sum to zero.
    pub fn new<T: AsPrimitive<f64>>(values: &[T]) -> Result<Option<Self>, FitError> {
        if values.is_empty() {
            return Ok(None);
        }
        let mut kernel: Vec<f64> = values.iter().map(|&v| v.as_()).collect();
        if let Some(index) = kernel.iter().position(|v| !v.is_finite()) {
            return Err(FitError::NonFinite {
                what: "instrument response",
                index,
            });
        }
        let sum: f64 = kernel.iter().sum();
        if sum == 0.0 {
            return Err(FitError::ZeroInstrumentResponse);
        }
        for k in kernel.iter_mut() {
            *k /= sum;
        }
        Ok(Some(Self { kernel }))
    }

    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    pub fn convolve(&self, signal: &[f64]) -> Vec<f64> {
        convolve(signal, &self.kernel)
    }
}
