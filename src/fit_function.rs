use crate::restrain::RestrainLimit;

/// A decay model for the [`Marquardt`](struct.Marquardt.html) solver.
///
/// For example, a straight line through the origin with an unused offset:
///
/// ```
/// use flim_fit::FitFunction;
///
/// struct Line;
///
/// impl FitFunction for Line {
///     fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
///         // The partial derivatives of our model, one for each parameter.
///         dy[0] = 1.0;
///         dy[1] = t;
///         params[1] * t
///     }
///
///     fn accepts_param_count(&self, n: usize) -> bool {
///         n == 2
///     }
/// }
///
/// let mut dy = [0.0; 2];
/// assert_eq!(Line.evaluate(2.0, &[0.0, 1.5], &mut dy), 3.0);
/// assert_eq!(dy, [1.0, 2.0]);
/// ```
pub trait FitFunction {
    /// Value of the model at time `t`.
    ///
    /// Must write `$\partial y/\partial p_k$` into `dy[k]` for every
    /// parameter; `dy` has the same length as `params`.
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64;

    /// Whether the model can be fitted with `n` parameters.
    fn accepts_param_count(&self, n: usize) -> bool;

    /// Intrinsic bounds of parameter `index` out of `n`, applied with
    /// [`RestrainType::Default`](enum.RestrainType.html). `period` is the
    /// bin width of the curve being fitted.
    fn default_limit(&self, index: usize, n: usize, period: f64) -> RestrainLimit {
        let _ = (index, n, period);
        RestrainLimit::FREE
    }
}

impl<M: FitFunction + ?Sized> FitFunction for &M {
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
        (**self).evaluate(t, params, dy)
    }

    fn accepts_param_count(&self, n: usize) -> bool {
        (**self).accepts_param_count(n)
    }

    fn default_limit(&self, index: usize, n: usize, period: f64) -> RestrainLimit {
        (**self).default_limit(index, n, period)
    }
}

impl<M: FitFunction + ?Sized> FitFunction for Box<M> {
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
        (**self).evaluate(t, params, dy)
    }

    fn accepts_param_count(&self, n: usize) -> bool {
        (**self).accepts_param_count(n)
    }

    fn default_limit(&self, index: usize, n: usize, period: f64) -> RestrainLimit {
        (**self).default_limit(index, n, period)
    }
}

fn odd_at_least_three(n: usize) -> bool {
    n >= 3 && n % 2 == 1
}

/// A tenth of the bin width; the lifetime gradient vanishes below it.
fn shortest_lifetime(period: f64) -> RestrainLimit {
    RestrainLimit::at_least(0.1 * period)
}

/// `$Z + \sum_j A_j e^{-t/\tau_j}$` with parameters `[Z, A1, tau1, A2, tau2, ...]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiExpTau;

impl FitFunction for MultiExpTau {
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
        let mut y = params[0];
        dy[0] = 1.0;
        for j in (1..params.len()).step_by(2) {
            let (a, tau) = (params[j], params[j + 1]);
            if tau == 0.0 {
                // the limit of a vanishing lifetime
                let e = if t <= 0.0 { 1.0 } else { 0.0 };
                y += a * e;
                dy[j] = e;
                dy[j + 1] = 0.0;
                continue;
            }
            let e = (-t / tau).exp();
            y += a * e;
            dy[j] = e;
            dy[j + 1] = a * t * e / (tau * tau);
        }
        y
    }

    fn accepts_param_count(&self, n: usize) -> bool {
        odd_at_least_three(n)
    }

    fn default_limit(&self, index: usize, _n: usize, period: f64) -> RestrainLimit {
        if index >= 2 && index % 2 == 0 {
            shortest_lifetime(period)
        } else {
            RestrainLimit::FREE
        }
    }
}

/// `$Z + \sum_j A_j e^{-\lambda_j t}$` with parameters `[Z, A1, lambda1, A2, lambda2, ...]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiExpLambda;

impl FitFunction for MultiExpLambda {
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
        let mut y = params[0];
        dy[0] = 1.0;
        for j in (1..params.len()).step_by(2) {
            let (a, rate) = (params[j], params[j + 1]);
            let e = (-rate * t).exp();
            y += a * e;
            dy[j] = e;
            dy[j + 1] = -a * t * e;
        }
        y
    }

    fn accepts_param_count(&self, n: usize) -> bool {
        odd_at_least_three(n)
    }

    fn default_limit(&self, index: usize, _n: usize, _period: f64) -> RestrainLimit {
        if index >= 2 && index % 2 == 0 {
            RestrainLimit::at_least(0.0)
        } else {
            RestrainLimit::FREE
        }
    }
}

const MIN_STRETCH: f64 = 0.1;

/// Stretched exponential `$Z + A e^{-(t/\tau)^{1/h}}$` with parameters `[Z, A, tau, h]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StretchedExp;

impl FitFunction for StretchedExp {
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
        let (z, a, tau, h) = (params[0], params[1], params[2], params[3]);
        dy[0] = 1.0;
        if t <= 0.0 {
            dy[1] = 1.0;
            dy[2] = 0.0;
            dy[3] = 0.0;
            return z + a;
        }
        if tau == 0.0 {
            dy[1..].fill(0.0);
            return z;
        }
        let ratio = t / tau;
        let u = ratio.powf(1.0 / h);
        let e = (-u).exp();
        dy[1] = e;
        dy[2] = a * e * u / (h * tau);
        dy[3] = a * e * u * ratio.ln() / (h * h);
        z + a * e
    }

    fn accepts_param_count(&self, n: usize) -> bool {
        n == 4
    }

    fn default_limit(&self, index: usize, _n: usize, period: f64) -> RestrainLimit {
        match index {
            2 => shortest_lifetime(period),
            3 => RestrainLimit::at_least(MIN_STRETCH),
            _ => RestrainLimit::FREE,
        }
    }
}

/// A caller-defined model built from two closures.
///
/// ```
/// use flim_fit::{FitFunction, UserFitFunction};
///
/// let model = UserFitFunction::new(
///     |t, p: &[f64], dy: &mut [f64]| {
///         let e = (-t / p[2]).exp();
///         dy[0] = 1.0;
///         dy[1] = e;
///         dy[2] = p[1] * t * e / (p[2] * p[2]);
///         p[0] + p[1] * e
///     },
///     |n| n == 3,
/// );
/// assert!(model.accepts_param_count(3));
/// assert!(!model.accepts_param_count(5));
/// ```
pub struct UserFitFunction<E, P> {
    evaluate: E,
    arity: P,
}

impl<E, P> UserFitFunction<E, P>
where
    E: Fn(f64, &[f64], &mut [f64]) -> f64,
    P: Fn(usize) -> bool,
{
    pub fn new(evaluate: E, arity: P) -> Self {
        Self { evaluate, arity }
    }
}

impl<E, P> FitFunction for UserFitFunction<E, P>
where
    E: Fn(f64, &[f64], &mut [f64]) -> f64,
    P: Fn(usize) -> bool,
{
    fn evaluate(&self, t: f64, params: &[f64], dy: &mut [f64]) -> f64 {
        (self.evaluate)(t, params, dy)
    }

    fn accepts_param_count(&self, n: usize) -> bool {
        (self.arity)(n)
    }
}
