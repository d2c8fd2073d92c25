use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use num_traits::AsPrimitive;

use crate::curve::{DecayCurve, InstrumentResponse};
use crate::error::{FitError, FitStatus};
use crate::fit_function::{FitFunction, MultiExpTau};
use crate::noise::{NoiseModel, NoiseType, Sigma};
use crate::problem::{DecayProblem, Evaluation, LeastSquaresProblem};
use crate::restrain::{resolve_limits, RestrainLimit, RestrainSet, RestrainType};

#[cfg(test)]
mod test_examples;
#[cfg(test)]
mod test_restrain;
#[cfg(test)]
mod test_termination;

const LAMBDA_MIN: f64 = 1.0e-12;
const LAMBDA_MAX: f64 = 1.0e16;

/// Result of a [`Marquardt`] fit.
#[derive(Debug, Clone, PartialEq)]
pub struct MarquardtResult {
    /// Final parameters. Fixed parameters keep their initial value.
    pub params: Vec<f64>,
    /// Model at every sample.
    pub fitted: Vec<f64>,
    /// `observed - fitted` at every sample.
    pub residuals: Vec<f64>,
    /// Weighted chi-square over the fit window, or the Poisson deviance
    /// for [`NoiseType::Mle`].
    pub chisq: f64,
    /// Inverse of the final normal-equations matrix. Rows and columns of
    /// fixed parameters are zero.
    pub covariance: DMatrix<f64>,
    /// Number of iterations, i.e. Jacobian evaluations used for a step.
    pub iterations: usize,
    pub status: FitStatus,
    degrees_of_freedom: usize,
}

impl MarquardtResult {
    pub fn reduced_chisq(&self) -> f64 {
        self.chisq / self.degrees_of_freedom as f64
    }

    /// Square roots of the covariance diagonal.
    pub fn standard_errors(&self) -> Vec<f64> {
        self.covariance.diagonal().iter().map(|v| v.sqrt()).collect()
    }
}

/// Levenberg-Marquardt solver for decay models.
///
/// Each iteration solves the damped, weighted normal equations
/// ```math
///   (\mathbf{J}^\top\mathbf{W}\mathbf{J} + \lambda\,\mathrm{diag}(\mathbf{J}^\top\mathbf{W}\mathbf{J}))\,
///   \Delta\vec{p} = \mathbf{J}^\top\mathbf{W}(\vec{y} - \vec{f})
/// ```
/// over the free parameters. A step is accepted if it lowers chi-square,
/// after which `$\lambda$` shrinks; otherwise `$\lambda$` grows and the step
/// is recomputed from the same point.
///
/// With restraints active every trial is projected into the parameter box,
/// and parameters sitting on a bound whose step points outward are held for
/// that step.
///
/// The runtime and termination behavior can be controlled by various hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Marquardt {
    chisq_target: f64,
    max_iterations: usize,
    lambda: f64,
    lambda_up: f64,
    lambda_down: f64,
    tolerance: f64,
    noise: NoiseType,
    sigma: Sigma,
    free: Option<Vec<bool>>,
    restrain: RestrainType,
    restrain_set: Option<Arc<RestrainSet>>,
    instrument: Option<InstrumentResponse>,
}

impl Marquardt {
    pub fn new() -> Self {
        Self {
            chisq_target: 0.0,
            max_iterations: 100,
            lambda: 1.0e-3,
            lambda_up: 10.0,
            lambda_down: 10.0,
            tolerance: 1.0e-6,
            noise: NoiseType::default(),
            sigma: Sigma::Default,
            free: None,
            restrain: RestrainType::default(),
            restrain_set: None,
            instrument: None,
        }
    }

    /// Stop as soon as the reduced chi-square falls below `chisq_target`.
    ///
    /// The default of zero disables this criterion.
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

    /// Set the maximal number of iterations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_iterations} = 0$`.
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        assert!(max_iterations > 0, "max_iterations must be > 0");
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the initial damping `$\lambda_0$`.
    ///
    /// # Panics
    ///
    /// Panics if `$\lambda_0 \leq 0$`.
    pub fn with_lambda(self, lambda: f64) -> Self {
        assert!(lambda > 0.0, "lambda must be > 0");
        Self { lambda, ..self }
    }

    /// Set the factors `$\lambda$` is multiplied with after a rejected step
    /// and divided by after an accepted one.
    ///
    /// # Panics
    ///
    /// Panics if either factor is `$\leq 1$`.
    pub fn with_lambda_factors(self, up: f64, down: f64) -> Self {
        assert!(up > 1.0 && down > 1.0, "lambda factors must be > 1");
        Self {
            lambda_up: up,
            lambda_down: down,
            ..self
        }
    }

    /// Set the relative chi-square improvement below which an accepted step
    /// counts as converged.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{tolerance} < 0$`.
    pub fn with_tolerance(self, tolerance: f64) -> Self {
        assert!(tolerance >= 0.0, "tolerance must be >= 0");
        Self { tolerance, ..self }
    }

    pub fn with_noise(self, noise: NoiseType, sigma: Sigma) -> Self {
        Self {
            noise,
            sigma,
            ..self
        }
    }

    /// Select the parameters the solver may change; `false` holds a
    /// parameter at its initial value. All parameters are free by default.
    pub fn with_free_mask(self, free: Vec<bool>) -> Self {
        Self {
            free: Some(free),
            ..self
        }
    }

    pub fn with_restrain(self, restrain: RestrainType) -> Self {
        Self { restrain, ..self }
    }

    /// Restrain with `set` instead of the process-wide configuration.
    pub fn with_restrain_set(self, set: Arc<RestrainSet>) -> Self {
        Self {
            restrain: RestrainType::User,
            restrain_set: Some(set),
            ..self
        }
    }

    pub fn with_instrument_response(self, instrument: Option<InstrumentResponse>) -> Self {
        Self { instrument, ..self }
    }

    /// Fit a [`MultiExpTau`] model starting at `initial`.
    pub fn fit<T: AsPrimitive<f64>>(
        &self,
        curve: &DecayCurve,
        initial: &[T],
    ) -> Result<MarquardtResult, FitError> {
        self.fit_with(curve, initial, &MultiExpTau)
    }

    /// Fit `model` starting at `initial`.
    ///
    /// # Errors
    ///
    /// - Validation errors for empty or non-finite parameters, a free mask
    ///   of the wrong length, noise configuration problems and restrain sets
    ///   that do not cover every parameter.
    /// - [`FitError::ModelArity`] if `model` does not accept
    ///   `initial.len()` parameters.
    /// - [`FitError::Numerical`] if chi-square is not finite at the
    ///   initial guess.
    ///
    /// Trouble during the iterations is reported through the result's
    /// `status` together with the last good iterate.
    pub fn fit_with<T, M>(
        &self,
        curve: &DecayCurve,
        initial: &[T],
        model: &M,
    ) -> Result<MarquardtResult, FitError>
    where
        T: AsPrimitive<f64>,
        M: FitFunction + ?Sized,
    {
        let params: Vec<f64> = initial.iter().map(|&p| p.as_()).collect();
        if params.is_empty() {
            return Err(FitError::NoParameters);
        }
        if let Some(index) = params.iter().position(|p| !p.is_finite()) {
            return Err(FitError::NonFinite {
                what: "initial parameters",
                index,
            });
        }
        let free = match &self.free {
            Some(mask) if mask.len() != params.len() => {
                return Err(FitError::FreeMaskLength {
                    expected: params.len(),
                    got: mask.len(),
                })
            }
            Some(mask) => (0..params.len()).filter(|&k| mask[k]).collect(),
            None => (0..params.len()).collect(),
        };
        if !model.accepts_param_count(params.len()) {
            return Err(FitError::ModelArity(params.len()));
        }
        let noise = NoiseModel::new(curve, self.noise, &self.sigma)?;
        let limits = resolve_limits(
            self.restrain,
            self.restrain_set.as_ref(),
            model,
            params.len(),
            curve.period(),
        )?;
        let problem = DecayProblem::new(curve, model, self.instrument.as_ref());
        self.minimize(curve, &problem, &noise, params, free, &limits)
    }

    /// Run the iterations on validated input.
    ///
    /// `free` lists the indices of the free parameters in increasing order.
    pub(crate) fn minimize<P: LeastSquaresProblem>(
        &self,
        curve: &DecayCurve,
        problem: &P,
        noise: &NoiseModel,
        mut params: Vec<f64>,
        free: Vec<usize>,
        limits: &[RestrainLimit],
    ) -> Result<MarquardtResult, FitError> {
        for &k in &free {
            params[k] = limits[k].clamp(params[k]);
        }
        let mut eval = problem.evaluate(&params);
        let mut chisq = noise.chisq(curve, &eval.fitted);
        if !chisq.is_finite() {
            return Err(FitError::Numerical(
                "chi-square at the initial guess is not finite",
            ));
        }
        let degrees_of_freedom = curve.fit_len().saturating_sub(free.len()).max(1);

        let mut lambda = self.lambda;
        let mut iterations = 0;
        let mut status = FitStatus::LostPatience;
        let reduced = chisq / degrees_of_freedom as f64;
        if free.is_empty() || chisq == 0.0 || reduced < self.chisq_target {
            // nothing to do
            status = FitStatus::Converged;
        }
        'outer: while status == FitStatus::LostPatience && iterations < self.max_iterations {
            iterations += 1;
            let weights = noise.weights(&eval.fitted);
            let (alpha, beta) = normal_equations(curve, &eval, &weights, &free);
            if !alpha.iter().chain(beta.iter()).all(|v| v.is_finite()) {
                status = FitStatus::Numerical("normal equations are not finite");
                break;
            }

            let mut solved = false;
            let mut finite = false;
            loop {
                if let Some(trial) = damped_step(&alpha, &beta, lambda, &free, &params, limits) {
                    solved = true;
                    let trial_eval = problem.evaluate(&trial);
                    let trial_chisq = noise.chisq(curve, &trial_eval.fitted);
                    finite |= trial_chisq.is_finite();
                    if trial_chisq < chisq {
                        let improvement = chisq - trial_chisq;
                        params = trial;
                        eval = trial_eval;
                        chisq = trial_chisq;
                        lambda = f64::max(lambda / self.lambda_down, LAMBDA_MIN);
                        log::trace!(
                            "marquardt iteration {iterations}: chisq {chisq} lambda {lambda}"
                        );
                        if chisq / (degrees_of_freedom as f64) < self.chisq_target
                            || improvement <= self.tolerance * (chisq + improvement)
                        {
                            status = FitStatus::Converged;
                        }
                        continue 'outer;
                    }
                }
                lambda *= self.lambda_up;
                log::debug!("marquardt iteration {iterations}: step rejected, lambda {lambda}");
                if lambda > LAMBDA_MAX {
                    // no step lowers chi-square any more
                    status = if !solved {
                        FitStatus::Numerical("normal equations are singular")
                    } else if !finite {
                        FitStatus::Numerical("model is not finite around the current parameters")
                    } else {
                        FitStatus::Converged
                    };
                    break 'outer;
                }
            }
        }

        let n = params.len();
        let mut covariance = DMatrix::zeros(n, n);
        if !free.is_empty() {
            let weights = noise.weights(&eval.fitted);
            let (alpha, _) = normal_equations(curve, &eval, &weights, &free);
            match alpha.try_inverse() {
                Some(inverse) => {
                    for (a, &i) in free.iter().enumerate() {
                        for (b, &j) in free.iter().enumerate() {
                            covariance[(i, j)] = inverse[(a, b)];
                        }
                    }
                }
                None if status.is_success() => {
                    status = FitStatus::Numerical("covariance matrix is singular");
                }
                None => {}
            }
        }

        Ok(MarquardtResult {
            residuals: curve.residuals(&eval.fitted),
            fitted: eval.fitted,
            params,
            chisq,
            covariance,
            iterations,
            status,
            degrees_of_freedom,
        })
    }
}

impl Default for Marquardt {
    fn default() -> Self {
        Self::new()
    }
}

/// `$\mathbf{J}^\top\mathbf{W}\mathbf{J}$` and `$\mathbf{J}^\top\mathbf{W}\vec{r}$`
/// over the fit window, restricted to the free parameters.
fn normal_equations(
    curve: &DecayCurve,
    eval: &Evaluation,
    weights: &[f64],
    free: &[usize],
) -> (DMatrix<f64>, DVector<f64>) {
    let range = curve.fit_range();
    let mut jacobian = DMatrix::zeros(range.len(), free.len());
    let mut residuals = DVector::zeros(range.len());
    for (row, i) in range.enumerate() {
        let scale = weights[i].sqrt();
        residuals[row] = scale * (curve.samples()[i] - eval.fitted[i]);
        for (col, &k) in free.iter().enumerate() {
            jacobian[(row, col)] = scale * eval.jacobian[(i, k)];
        }
    }
    (jacobian.tr_mul(&jacobian), jacobian.tr_mul(&residuals))
}

/// Trial parameters for damping `lambda`, or `None` if the damped system
/// cannot be solved.
fn damped_step(
    alpha: &DMatrix<f64>,
    beta: &DVector<f64>,
    lambda: f64,
    free: &[usize],
    params: &[f64],
    limits: &[RestrainLimit],
) -> Option<Vec<f64>> {
    // positions into `free` that take part in this step
    let mut active: Vec<usize> = (0..free.len()).collect();
    while !active.is_empty() {
        let mut system = alpha.select_rows(&active).select_columns(&active);
        let rhs = beta.select_rows(&active);
        for d in 0..active.len() {
            let diag = system[(d, d)];
            system[(d, d)] = diag + lambda * if diag > 0.0 { diag } else { 1.0 };
        }
        let delta = solve(system, rhs)?;

        let blocked: Vec<usize> = active
            .iter()
            .zip(delta.iter())
            .filter(|(pos, step)| {
                let k = free[**pos];
                limits[k].blocks(params[k], **step)
            })
            .map(|(pos, _)| *pos)
            .collect();
        if blocked.is_empty() {
            let mut trial = params.to_vec();
            for (pos, step) in active.iter().zip(delta.iter()) {
                let k = free[*pos];
                trial[k] = limits[k].clamp(params[k] + step);
            }
            return Some(trial);
        }
        active.retain(|pos| !blocked.contains(pos));
    }
    // every free parameter is pinned to a bound
    Some(params.to_vec())
}

fn solve(system: DMatrix<f64>, rhs: DVector<f64>) -> Option<DVector<f64>> {
    if let Some(cholesky) = system.clone().cholesky() {
        return Some(cholesky.solve(&rhs));
    }
    system.lu().solve(&rhs)
}
