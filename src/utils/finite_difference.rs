//! Extrapolated central differences.
#[cfg(test)]
use approx::assert_relative_eq;

const STEP_RATIO: f64 = 1.4;
const TABLEAU: usize = 10;

/// Compute the derivative of `f` at `x` using central difference quotients
/// with shrinking steps and a Neville tableau of Richardson extrapolations.
///
/// The algorithm is based on
///
/// > C. J. F. Ridders. Accurate computation of F'(x) and F'(x)F''(x).
/// > Advances in Engineering Software, Vol. 4, No. 2 (1982), pp. 75-76.
///
/// Returns `None` as soon as `f` does.
pub(crate) fn derivative(x: f64, mut f: impl FnMut(f64) -> Option<f64>) -> Option<f64> {
    let ratio2 = STEP_RATIO * STEP_RATIO;
    let mut h = 0.1 * x.abs().max(1.0);
    let mut a = [[0.0f64; TABLEAU]; TABLEAU];
    a[0][0] = (f(x + h)? - f(x - h)?) / (2.0 * h);
    let mut best = a[0][0];
    let mut err = f64::MAX;
    for i in 1..TABLEAU {
        h /= STEP_RATIO;
        a[0][i] = (f(x + h)? - f(x - h)?) / (2.0 * h);
        let mut fac = ratio2;
        for j in 1..=i {
            a[j][i] = (a[j - 1][i] * fac - a[j - 1][i - 1]) / (fac - 1.0);
            fac *= ratio2;
            let e = f64::max(
                (a[j][i] - a[j - 1][i]).abs(),
                (a[j][i] - a[j - 1][i - 1]).abs(),
            );
            if e <= err {
                err = e;
                best = a[j][i];
            }
        }
        // higher order got worse, stop early
        if (a[i][i] - a[i - 1][i - 1]).abs() >= 2.0 * err {
            break;
        }
    }
    Some(best)
}

#[test]
fn test_linear() {
    assert_relative_eq!(
        derivative(0.123, |x| Some(3. * x - 1.)).unwrap(),
        3.,
        epsilon = 1e-10
    );
    assert_relative_eq!(
        derivative(0.0, |x| Some(-3. * x - 1.)).unwrap(),
        -3.,
        epsilon = 1e-10
    );
    assert_relative_eq!(derivative(0.2, |_| Some(1.)).unwrap(), 0.);
}

#[test]
fn test_standard_functions() {
    assert_relative_eq!(
        derivative(-1.2, |x| Some(x.exp())).unwrap(),
        (-1.2f64).exp(),
        epsilon = 1e-9
    );
    assert_relative_eq!(
        derivative(90., |x| Some(x.ln())).unwrap(),
        1. / 90.,
        epsilon = 1e-9
    );
}

#[test]
fn test_failure_propagates() {
    assert!(derivative(0.0, |x| if x > 0.0 { Some(x) } else { None }).is_none());
}
