//! Box constraints for the Marquardt solver.
//!
//! The process-wide restrain set is an immutable [`RestrainSet`] snapshot
//! behind a reader-writer lock. Configuring it builds a complete new snapshot
//! and swaps the pointer, so a fit in progress always sees one consistent set
//! of limits.
use core::fmt;
use core::str::FromStr;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::error::FitError;
use crate::fit_function::FitFunction;

static RESTRAIN: LazyLock<RwLock<Option<Arc<RestrainSet>>>> = LazyLock::new(|| RwLock::new(None));
static VERSION: AtomicU64 = AtomicU64::new(0);

/// Which constraints the solver applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RestrainType {
    /// The fit function's own limits, see
    /// [`FitFunction::default_limit`](trait.FitFunction.html#method.default_limit).
    #[default]
    Default,
    /// The limits configured with [`set_restrain_limits`].
    User,
}

impl RestrainType {
    pub fn token(&self) -> &'static str {
        match self {
            RestrainType::Default => "ECF_RESTRAIN_DEFAULT",
            RestrainType::User => "ECF_RESTRAIN_USER",
        }
    }
}

impl fmt::Display for RestrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for RestrainType {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ECF_RESTRAIN_DEFAULT" => Ok(RestrainType::Default),
            "ECF_RESTRAIN_USER" => Ok(RestrainType::User),
            other => Err(FitError::UnknownRestrainType(other.into())),
        }
    }
}

/// Constraint on a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrainKind {
    Free,
    FixedBounds,
}

impl TryFrom<i64> for RestrainKind {
    type Error = FitError;

    /// `0` is free, `1` is bounded.
    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RestrainKind::Free),
            1 => Ok(RestrainKind::FixedBounds),
            other => Err(FitError::UnknownRestrainKind(other.to_string())),
        }
    }
}

impl FromStr for RestrainKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(RestrainKind::Free),
            "FIXED_BOUNDS" => Ok(RestrainKind::FixedBounds),
            other => Err(FitError::UnknownRestrainKind(other.into())),
        }
    }
}

/// Limits of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestrainLimit {
    pub kind: RestrainKind,
    pub min: f64,
    pub max: f64,
}

impl RestrainLimit {
    pub const FREE: Self = Self {
        kind: RestrainKind::Free,
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    /// # Panics
    ///
    /// Panics if `$\mathtt{min} > \mathtt{max}$` or either is NaN.
    pub fn bounds(min: f64, max: f64) -> Self {
        assert!(min <= max, "min must be <= max");
        Self {
            kind: RestrainKind::FixedBounds,
            min,
            max,
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self::bounds(min, f64::INFINITY)
    }

    pub fn is_free(&self) -> bool {
        self.kind == RestrainKind::Free
    }

    /// Project `value` into the limits.
    pub fn clamp(&self, value: f64) -> f64 {
        match self.kind {
            RestrainKind::Free => value,
            RestrainKind::FixedBounds => value.max(self.min).min(self.max),
        }
    }

    /// Whether `value` sits on a bound and `step` points out of the box.
    pub fn blocks(&self, value: f64, step: f64) -> bool {
        match self.kind {
            RestrainKind::Free => false,
            RestrainKind::FixedBounds => {
                (value >= self.max && step > 0.0) || (value <= self.min && step < 0.0)
            }
        }
    }
}

/// An immutable, versioned set of per-parameter limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RestrainSet {
    version: u64,
    limits: Vec<RestrainLimit>,
}

impl RestrainSet {
    /// Build a set from parallel sequences of kinds, minima and maxima.
    ///
    /// Minima and maxima of free parameters are ignored.
    ///
    /// # Errors
    ///
    /// - [`FitError::RestrainLength`] if the three sequences differ in length.
    /// - [`FitError::RestrainBounds`] if a bounded parameter has `min > max`
    ///   or a NaN bound.
    pub fn new(kinds: &[RestrainKind], mins: &[f64], maxs: &[f64]) -> Result<Self, FitError> {
        if kinds.len() != mins.len() || kinds.len() != maxs.len() {
            return Err(FitError::RestrainLength {
                kinds: kinds.len(),
                mins: mins.len(),
                maxs: maxs.len(),
            });
        }
        let mut limits = Vec::with_capacity(kinds.len());
        for (index, ((&kind, &min), &max)) in kinds.iter().zip(mins).zip(maxs).enumerate() {
            limits.push(match kind {
                RestrainKind::Free => RestrainLimit::FREE,
                RestrainKind::FixedBounds if min <= max => RestrainLimit::bounds(min, max),
                RestrainKind::FixedBounds => {
                    return Err(FitError::RestrainBounds { index, min, max })
                }
            });
        }
        Ok(Self {
            version: VERSION.fetch_add(1, Ordering::Relaxed) + 1,
            limits,
        })
    }

    /// Monotonically increasing across every set built in this process.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn limits(&self) -> &[RestrainLimit] {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

/// Replace the process-wide restrain set.
///
/// The new set becomes visible atomically to every fit that starts after
/// this call returns. Fits already running keep the snapshot they started
/// with.
///
/// # Errors
///
/// See [`RestrainSet::new`]. On error the previous configuration is kept.
pub fn set_restrain_limits(
    kinds: &[RestrainKind],
    mins: &[f64],
    maxs: &[f64],
) -> Result<Arc<RestrainSet>, FitError> {
    let set = Arc::new(RestrainSet::new(kinds, mins, maxs)?);
    log::debug!(
        "restrain limits set to version {} with {} parameters",
        set.version(),
        set.len()
    );
    *RESTRAIN.write() = Some(set.clone());
    Ok(set)
}

/// Clear the process-wide restrain set.
pub fn reset_restrain_limits() {
    *RESTRAIN.write() = None;
}

/// Snapshot of the process-wide restrain set, if one is configured.
pub fn restrain_limits() -> Option<Arc<RestrainSet>> {
    RESTRAIN.read().clone()
}

/// Per-parameter limits of one fit on a curve with bin width `period`.
///
/// `explicit` takes precedence over the process-wide set for
/// [`RestrainType::User`].
pub(crate) fn resolve_limits<M: FitFunction + ?Sized>(
    restrain: RestrainType,
    explicit: Option<&Arc<RestrainSet>>,
    model: &M,
    n: usize,
    period: f64,
) -> Result<Vec<RestrainLimit>, FitError> {
    match restrain {
        RestrainType::Default => Ok((0..n).map(|i| model.default_limit(i, n, period)).collect()),
        RestrainType::User => {
            let set = explicit.cloned().or_else(restrain_limits);
            let limits = set.as_ref().map(|s| s.limits()).unwrap_or(&[]);
            if limits.len() != n {
                return Err(FitError::RestrainArity {
                    configured: limits.len(),
                    params: n,
                });
            }
            Ok(limits.to_vec())
        }
    }
}
