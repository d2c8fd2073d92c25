use crate::FitFunction;

mod finite_difference;

pub(crate) use finite_difference::derivative;

/// Trapezoidal integral of `values[start..=end]` sampled every `step`.
///
/// Returns zero for an empty region (`start == end`).
pub(crate) fn trapezoid(values: &[f64], start: usize, end: usize, step: f64) -> f64 {
    if end <= start {
        return 0.0;
    }
    let inner: f64 = values[start + 1..end].iter().sum();
    step * (inner + 0.5 * (values[start] + values[end]))
}

/// Causal convolution of `signal` with `kernel`, truncated to the length of
/// `signal`.
///
/// ```math
///   (s \ast k)_i = \sum_{j=0}^{\min(i, K-1)} k_j\, s_{i-j}
/// ```
pub(crate) fn convolve(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; signal.len()];
    for (i, o) in out.iter_mut().enumerate() {
        *o = kernel
            .iter()
            .take(i + 1)
            .enumerate()
            .map(|(j, k)| k * signal[i - j])
            .sum();
    }
    out
}

/// Compute a [numerical approximation](https://en.wikipedia.org/wiki/Numerical_differentiation)
/// to the parameter gradient of a fit function at time `t`.
///
/// The function is intended to be used for debugging or testing.
/// You can check the analytic derivatives of a
/// [`FitFunction`](trait.FitFunction.html) implementation with it.
///
/// Computing the derivatives numerically is unstable: You can construct
/// functions where the computed result is catastrophically wrong. If you
/// observe large differences between the gradient computed by this function
/// and your implementation the reason _might_ be due to instability.
///
/// Returns `None` if the function produces a non-finite value near `params`.
///
/// # Example
///
/// ```
/// # use approx::assert_relative_eq;
/// use flim_fit::{differentiate_numerically, FitFunction, MultiExpTau};
///
/// let params = [0.5, 10.0, 2.0];
/// let mut analytic = [0.0; 3];
/// MultiExpTau.evaluate(0.3, &params, &mut analytic);
/// let numeric = differentiate_numerically(&MultiExpTau, 0.3, &params).unwrap();
/// for (a, n) in analytic.iter().zip(&numeric) {
///     assert_relative_eq!(a, n, epsilon = 1e-8);
/// }
/// ```
pub fn differentiate_numerically<M>(model: &M, t: f64, params: &[f64]) -> Option<Vec<f64>>
where
    M: FitFunction + ?Sized,
{
    let mut x = params.to_vec();
    let mut scratch = vec![0.0; params.len()];
    let mut gradient = Vec::with_capacity(params.len());
    for k in 0..params.len() {
        let at = params[k];
        let d = derivative(at, |p| {
            x[k] = p;
            let y = model.evaluate(t, &x, &mut scratch);
            y.is_finite().then_some(y)
        });
        x[k] = at;
        gradient.push(d?);
    }
    Some(gradient)
}
