//! Bayesian lifetime estimate from the photon arrival histogram.
//!
//! The `$N$` photons in the fit window `$W$` are treated as independent
//! draws from the bins, each bin weighted by the decay model
//! `$f_i = Z + A\,s_i(\tau)$`:
//! ```math
//!   \ln P(y \mid Z, A, \tau) = \sum_{i\in W} y_i
//!     \ln\frac{f_i}{\sum_{j\in W} f_j} + \mathrm{const}.
//! ```
//! The shape `$s_i$` is the decay excited by a train of laser pulses and
//! convolved with the instrument response. A free amplitude is tied to the
//! photon count, which leaves the lifetime and the background fraction
//! `$Z\,|W|/N$` to integrate over. The posterior is evaluated on a grid
//! uniform in `$\ln\tau$` and in the background fraction, first over the
//! whole range and then again over the cells that hold its mass. The
//! estimate is the posterior mean and the error its standard deviation.
use num_traits::AsPrimitive;

use crate::curve::{DecayCurve, InstrumentResponse};
use crate::error::{FitError, FitStatus};
use crate::noise::{NoiseModel, NoiseType, Sigma};

/// Grid points whose log-likelihood lies this far below the best one carry
/// no posterior mass.
const NEGLIGIBLE: f64 = 20.0;

/// Result of the [`Bayes`] estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct BayesResult {
    /// Posterior mean in the `[Z, A, tau]` layout of
    /// [`MultiExpTau`](struct.MultiExpTau.html).
    pub params: [f64; 3],
    /// Posterior standard deviation of each parameter, zero for fixed ones.
    pub errors: [f64; 3],
    /// Model at every sample.
    pub fitted: Vec<f64>,
    /// `observed - fitted` at every sample.
    pub residuals: Vec<f64>,
    /// Negative log-likelihood of the estimate, without the multinomial
    /// constant.
    pub minus_log_prob: f64,
    /// Photons in the fit window.
    pub photons: f64,
    /// Chi-square of the estimate with Poisson weights from the fit.
    pub chisq: f64,
    pub status: FitStatus,
    degrees_of_freedom: usize,
}

impl BayesResult {
    pub fn reduced_chisq(&self) -> f64 {
        self.chisq / self.degrees_of_freedom as f64
    }
}

/// Bayesian estimator for a single exponential with background.
///
/// Needs no initial guess for free parameters; `initial` only supplies the
/// values of the parameters held by [`Bayes::with_free_mask`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bayes {
    free: Option<Vec<bool>>,
    lifetimes: Option<(f64, f64)>,
    grid: (usize, usize),
    laser_period: Option<f64>,
    instrument: Option<InstrumentResponse>,
}

/// One grid point of the posterior.
struct Point {
    params: [f64; 3],
    log_lik: f64,
    cell: (usize, usize),
}

impl Bayes {
    pub fn new() -> Self {
        Self {
            free: None,
            lifetimes: None,
            grid: (128, 64),
            laser_period: None,
            instrument: None,
        }
    }

    /// Select the parameters to estimate; `false` holds a parameter at its
    /// value in `initial`. All parameters are free by default.
    pub fn with_free_mask(self, free: Vec<bool>) -> Self {
        Self {
            free: Some(free),
            ..self
        }
    }

    /// Set the lifetimes the prior covers. Defaults to one bin up to twice
    /// the length of the fit window.
    ///
    /// # Panics
    ///
    /// Panics unless `$0 < \mathtt{min} < \mathtt{max} < \infty$`.
    pub fn with_lifetime_range(self, min: f64, max: f64) -> Self {
        assert!(
            min > 0.0 && min < max && max.is_finite(),
            "lifetime range must satisfy 0 < min < max"
        );
        Self {
            lifetimes: Some((min, max)),
            ..self
        }
    }

    /// Set the number of grid points along the lifetime and the background
    /// fraction. Both passes use the same size.
    ///
    /// # Panics
    ///
    /// Panics if either size is zero.
    pub fn with_grid_size(self, lifetimes: usize, backgrounds: usize) -> Self {
        assert!(lifetimes > 0 && backgrounds > 0, "grid sizes must be > 0");
        Self {
            grid: (lifetimes, backgrounds),
            ..self
        }
    }

    /// Model the decay as excited every `period` time units, so light from
    /// earlier pulses reaches the start of the curve.
    ///
    /// # Panics
    ///
    /// Panics if `period` is not positive and finite.
    pub fn with_laser_period(self, period: f64) -> Self {
        assert!(period > 0.0 && period.is_finite(), "laser period must be > 0");
        Self {
            laser_period: Some(period),
            ..self
        }
    }

    pub fn with_instrument_response(self, instrument: Option<InstrumentResponse>) -> Self {
        Self { instrument, ..self }
    }

    /// Estimate `[Z, A, tau]` from the photon counts of `curve`.
    ///
    /// # Errors
    ///
    /// - [`FitError::ModelArity`] unless `initial` has three values.
    /// - Validation errors for non-finite values in `initial`, a free mask
    ///   of the wrong length, a held parameter outside its physical range
    ///   and negative counts in the fit window.
    /// - [`FitError::ZeroIntensity`] if the fit window holds no photons.
    ///
    /// A posterior without support on the grid is reported through the
    /// result's `status`.
    pub fn fit<T: AsPrimitive<f64>>(
        &self,
        curve: &DecayCurve,
        initial: &[T],
    ) -> Result<BayesResult, FitError> {
        let values: Vec<f64> = initial.iter().map(|&p| p.as_()).collect();
        let initial: [f64; 3] = values
            .as_slice()
            .try_into()
            .map_err(|_| FitError::ModelArity(values.len()))?;
        if let Some(index) = initial.iter().position(|p| !p.is_finite()) {
            return Err(FitError::NonFinite {
                what: "initial parameters",
                index,
            });
        }
        let free = match &self.free {
            Some(mask) if mask.len() != 3 => {
                return Err(FitError::FreeMaskLength {
                    expected: 3,
                    got: mask.len(),
                })
            }
            Some(mask) => [mask[0], mask[1], mask[2]],
            None => [true; 3],
        };
        for (index, &value) in initial.iter().enumerate() {
            let valid = match index {
                2 => value > 0.0,
                _ => value >= 0.0,
            };
            if !free[index] && !valid {
                return Err(FitError::InvalidParameter { index, value });
            }
        }
        if !free[0] && !free[1] && initial[0] == 0.0 && initial[1] == 0.0 {
            return Err(FitError::InvalidParameter {
                index: 1,
                value: initial[1],
            });
        }

        let range = curve.fit_range();
        let window = &curve.samples()[range.clone()];
        if let Some(k) = window.iter().position(|&y| y < 0.0) {
            return Err(FitError::NegativeCounts {
                index: range.start + k,
                value: window[k],
            });
        }
        let photons: f64 = window.iter().sum();
        if photons == 0.0 {
            return Err(FitError::ZeroIntensity);
        }
        let noise = NoiseModel::new(curve, NoiseType::PoissonFit, &Sigma::Default)?;
        let degrees_of_freedom = curve
            .fit_len()
            .saturating_sub(free.iter().filter(|&&f| f).count())
            .max(1);

        let h = curve.period();
        let (min, max) = self
            .lifetimes
            .unwrap_or((h, 2.0 * curve.fit_len() as f64 * h));
        let (lifetimes, backgrounds) = self.grid;
        let mut taus = if free[2] {
            geometric(min, max, lifetimes)
        } else {
            vec![initial[2]]
        };
        let coarse = backgrounds as f64;
        let mut fractions: Vec<f64> = (0..backgrounds).map(|k| k as f64 / coarse).collect();

        let mut points = self.evaluate(curve, free, initial, photons, &taus, &fractions);
        if let Some(((j0, j1), (k0, k1))) = support(&points, taus.len(), fractions.len()) {
            log::debug!(
                "bayes zooms to tau {}..{} and background fraction {}..{}",
                taus[j0],
                taus[j1],
                fractions[k0],
                fractions[k1]
            );
            if free[2] {
                taus = geometric(taus[j0], taus[j1], lifetimes);
            }
            fractions = linear(fractions[k0], fractions[k1], backgrounds);
            points = self.evaluate(curve, free, initial, photons, &taus, &fractions);
        }

        let Some((mut params, mut errors)) = posterior(&points) else {
            return Ok(BayesResult {
                params: [f64::NAN; 3],
                errors: [f64::NAN; 3],
                fitted: vec![f64::NAN; curve.len()],
                residuals: vec![f64::NAN; curve.len()],
                minus_log_prob: f64::NAN,
                photons,
                chisq: f64::NAN,
                status: FitStatus::Numerical("no grid point explains the counts"),
                degrees_of_freedom,
            });
        };
        for k in (0..3).filter(|&k| !free[k]) {
            params[k] = initial[k];
            errors[k] = 0.0;
        }
        let [z, a, tau] = params;
        log::debug!("bayes over {photons} photons: tau {tau} +- {}", errors[2]);

        let shape = self.shape(curve, tau);
        let in_window = &shape[range.clone()];
        let total = window.len() as f64 * z + a * in_window.iter().sum::<f64>();
        let minus_log_prob = log_likelihood(window, in_window, z, a, total)
            .map_or(f64::INFINITY, |log_lik| -log_lik);
        let fitted: Vec<f64> = shape.iter().map(|s| z + a * s).collect();
        let chisq = noise.chisq(curve, &fitted);

        Ok(BayesResult {
            params,
            errors,
            residuals: curve.residuals(&fitted),
            fitted,
            minus_log_prob,
            photons,
            chisq,
            status: FitStatus::Converged,
            degrees_of_freedom,
        })
    }

    /// Unit-amplitude decay with lifetime `tau` at every sample.
    fn shape(&self, curve: &DecayCurve, tau: f64) -> Vec<f64> {
        let decay = |t: f64| match self.laser_period {
            Some(period) => (-t.rem_euclid(period) / tau).exp() / -(-period / tau).exp_m1(),
            None if t >= 0.0 => (-t / tau).exp(),
            None => 0.0,
        };
        let h = curve.period();
        match &self.instrument {
            Some(irf) => (0..curve.len())
                .map(|i| {
                    irf.kernel()
                        .iter()
                        .enumerate()
                        .map(|(k, w)| w * decay((i as f64 - k as f64) * h))
                        .sum()
                })
                .collect(),
            None => (0..curve.len()).map(|i| decay(curve.time(i))).collect(),
        }
    }

    /// Log-likelihood at every grid point with posterior support.
    fn evaluate(
        &self,
        curve: &DecayCurve,
        free: [bool; 3],
        initial: [f64; 3],
        photons: f64,
        taus: &[f64],
        fractions: &[f64],
    ) -> Vec<Point> {
        let range = curve.fit_range();
        let window = &curve.samples()[range.clone()];
        let width = window.len() as f64;
        let mut points = vec![];
        for (j, &tau) in taus.iter().enumerate() {
            let shape = self.shape(curve, tau);
            let shape = &shape[range.clone()];
            let sum: f64 = shape.iter().sum();
            if !(sum.is_finite() && sum > 0.0) {
                continue;
            }
            let mut push = |k: usize, z: f64, a: f64| {
                if let Some(log_lik) = log_likelihood(window, shape, z, a, width * z + a * sum) {
                    points.push(Point {
                        params: [z, a, tau],
                        log_lik,
                        cell: (j, k),
                    });
                }
            };
            // a free amplitude takes whatever photons the rest leaves
            match (free[0], free[1]) {
                (true, true) => {
                    for (k, &fraction) in fractions.iter().enumerate() {
                        push(k, fraction * photons / width, (1.0 - fraction) * photons / sum);
                    }
                }
                (false, true) => push(0, initial[0], (photons - initial[0] * width) / sum),
                (true, false) => push(0, (photons - initial[1] * sum) / width, initial[1]),
                (false, false) => push(0, initial[0], initial[1]),
            }
        }
        points
    }
}

impl Default for Bayes {
    fn default() -> Self {
        Self::new()
    }
}

/// `$\sum_i y_i \ln(f_i/F)$`, or `None` where the model cannot produce the
/// counts.
fn log_likelihood(window: &[f64], shape: &[f64], z: f64, a: f64, total: f64) -> Option<f64> {
    if z < 0.0 || a < 0.0 || !(total > 0.0) {
        return None;
    }
    let mut log_lik = 0.0;
    for (&y, &s) in window.iter().zip(shape) {
        if y == 0.0 {
            continue;
        }
        let f = z + a * s;
        if !(f > 0.0) {
            return None;
        }
        log_lik += y * (f / total).ln();
    }
    log_lik.is_finite().then_some(log_lik)
}

/// Index bounds of the cells holding posterior mass, widened by one cell.
fn support(
    points: &[Point],
    taus: usize,
    fractions: usize,
) -> Option<((usize, usize), (usize, usize))> {
    let best = points.iter().map(|p| p.log_lik).fold(f64::NEG_INFINITY, f64::max);
    let mut cells = points
        .iter()
        .filter(|p| p.log_lik > best - NEGLIGIBLE)
        .map(|p| p.cell);
    let (j, k) = cells.next()?;
    let ((j0, j1), (k0, k1)) = cells.fold(((j, j), (k, k)), |((j0, j1), (k0, k1)), (j, k)| {
        ((j0.min(j), j1.max(j)), (k0.min(k), k1.max(k)))
    });
    Some((
        (j0.saturating_sub(1), (j1 + 1).min(taus - 1)),
        (k0.saturating_sub(1), (k1 + 1).min(fractions - 1)),
    ))
}

/// Posterior mean and standard deviation of the parameters.
fn posterior(points: &[Point]) -> Option<([f64; 3], [f64; 3])> {
    let best = points.iter().map(|p| p.log_lik).fold(f64::NEG_INFINITY, f64::max);
    if !best.is_finite() {
        return None;
    }
    let weights: Vec<f64> = points.iter().map(|p| (p.log_lik - best).exp()).collect();
    let total: f64 = weights.iter().sum();
    let mut mean = [0.0; 3];
    for (p, w) in points.iter().zip(&weights) {
        for (m, x) in mean.iter_mut().zip(p.params) {
            *m += w * x / total;
        }
    }
    let mut variance = [0.0; 3];
    for (p, w) in points.iter().zip(&weights) {
        for ((v, m), x) in variance.iter_mut().zip(mean).zip(p.params) {
            *v += w * (x - m).powi(2) / total;
        }
    }
    Some((mean, variance.map(f64::sqrt)))
}

fn linear(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![min];
    }
    let step = (max - min) / (n - 1) as f64;
    (0..n).map(|k| min + step * k as f64).collect()
}

fn geometric(min: f64, max: f64, n: usize) -> Vec<f64> {
    linear(min.ln(), max.ln(), n).into_iter().map(f64::exp).collect()
}
