use nalgebra::DMatrix;

use crate::curve::{DecayCurve, InstrumentResponse};
use crate::fit_function::FitFunction;

/// Model values and their parameter derivatives at every sample.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Evaluation {
    pub fitted: Vec<f64>,
    /// `$\partial f_i / \partial p_k$`, one row per sample and one column
    /// per parameter.
    pub jacobian: DMatrix<f64>,
}

/// A least squares problem as seen by the [`Marquardt`](struct.Marquardt.html)
/// solver.
///
/// The solver owns weights, chi-square and the parameter updates; a problem
/// only has to evaluate its model.
pub(crate) trait LeastSquaresProblem {
    /// Evaluate the model and its Jacobian for all parameters.
    fn evaluate(&self, params: &[f64]) -> Evaluation;
}

/// A [`FitFunction`] sampled on the time axis of a decay curve, convolved
/// with the instrument response if there is one.
pub(crate) struct DecayProblem<'a, M: ?Sized> {
    curve: &'a DecayCurve,
    model: &'a M,
    instrument: Option<&'a InstrumentResponse>,
}

impl<'a, M: FitFunction + ?Sized> DecayProblem<'a, M> {
    pub fn new(
        curve: &'a DecayCurve,
        model: &'a M,
        instrument: Option<&'a InstrumentResponse>,
    ) -> Self {
        Self {
            curve,
            model,
            instrument,
        }
    }
}

impl<M: FitFunction + ?Sized> LeastSquaresProblem for DecayProblem<'_, M> {
    fn evaluate(&self, params: &[f64]) -> Evaluation {
        let n = self.curve.len();
        let mut fitted = vec![0.0; n];
        let mut jacobian = DMatrix::zeros(n, params.len());
        let mut dy = vec![0.0; params.len()];
        for (i, f) in fitted.iter_mut().enumerate() {
            dy.fill(0.0);
            *f = self.model.evaluate(self.curve.time(i), params, &mut dy);
            for (k, d) in dy.iter().enumerate() {
                jacobian[(i, k)] = *d;
            }
        }
        if let Some(irf) = self.instrument {
            fitted = irf.convolve(&fitted);
            for mut column in jacobian.column_iter_mut() {
                let values: Vec<f64> = column.iter().copied().collect();
                column.copy_from_slice(&irf.convolve(&values));
            }
        }
        Evaluation { fitted, jacobian }
    }
}
