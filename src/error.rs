use thiserror::Error;

use crate::noise::NoiseType;

/// Broad class of a [`FitError`].
///
/// Lets a caller tell malformed input apart from an unsuitable model and
/// from a breakdown of the numerics without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed shape, length or range of an input. Raised before any
    /// numeric work starts.
    Validation,
    /// The parameter count is not accepted by the chosen fit function.
    ModelArity,
    /// The computation itself broke down and no meaningful partial result
    /// exists.
    Numerical,
}

/// Errors returned by the estimators and the restrain configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("period must be positive and finite, got {0}")]
    InvalidPeriod(f64),

    #[error("decay curve needs at least 2 samples, got {0}")]
    CurveTooShort(usize),

    #[error("non-finite value in {what} at index {index}")]
    NonFinite { what: &'static str, index: usize },

    #[error("fit range {start}..{end} is invalid for a curve of {len} samples")]
    InvalidFitRange {
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("instrument response sums to zero")]
    ZeroInstrumentResponse,

    #[error("unknown noise type `{0}`")]
    UnknownNoiseType(String),

    #[error("noise type {noise} is not supported by {estimator}")]
    UnsupportedNoiseType {
        noise: NoiseType,
        estimator: &'static str,
    },

    #[error("noise type {0} needs a sigma argument")]
    MissingSigma(NoiseType),

    #[error("sigma has {got} values, expected {expected}")]
    SigmaLength { expected: usize, got: usize },

    #[error("sigma must be positive and finite, got {value} at index {index}")]
    InvalidSigma { index: usize, value: f64 },

    #[error("free mask has {got} entries, expected {expected}")]
    FreeMaskLength { expected: usize, got: usize },

    #[error("no parameters given")]
    NoParameters,

    #[error("fit function does not accept {0} parameters")]
    ModelArity(usize),

    #[error("unknown restrain type `{0}`")]
    UnknownRestrainType(String),

    #[error("unknown restrain kind `{0}`")]
    UnknownRestrainKind(String),

    #[error("restrain limits have mismatched lengths: {kinds} kinds, {mins} minima, {maxs} maxima")]
    RestrainLength {
        kinds: usize,
        mins: usize,
        maxs: usize,
    },

    #[error("restrain bounds at index {index} are invalid: min {min} > max {max}")]
    RestrainBounds { index: usize, min: f64, max: f64 },

    #[error("restrain set covers {configured} parameters but the fit has {params}")]
    RestrainArity { configured: usize, params: usize },

    #[error("photon counts cannot be negative, got {value} at index {index}")]
    NegativeCounts { index: usize, value: f64 },

    #[error("parameter {index} cannot be held at {value}")]
    InvalidParameter { index: usize, value: f64 },

    #[error("total intensity in the fit window is zero")]
    ZeroIntensity,

    #[error("numerical failure: {0}")]
    Numerical(&'static str),
}

impl FitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FitError::ModelArity(_) => ErrorKind::ModelArity,
            FitError::ZeroIntensity | FitError::Numerical(_) => ErrorKind::Numerical,
            _ => ErrorKind::Validation,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// How an estimator finished.
///
/// Only [`FitStatus::Converged`] is a clean success. The other variants still
/// come with a usable result record holding the best estimate found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// A termination criterion was met.
    Converged,
    /// The chi-square target was not met within the retry budget.
    TargetNotReached,
    /// Maximum number of iterations was hit.
    LostPatience,
    /// The numerics broke down; the result holds the last good iterate.
    Numerical(&'static str),
}

impl FitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }

    /// Integer status code, `0` on success.
    pub fn code(&self) -> i32 {
        match self {
            FitStatus::Converged => 0,
            FitStatus::TargetNotReached => 1,
            FitStatus::LostPatience => 2,
            FitStatus::Numerical(_) => -1,
        }
    }
}
