//! Error taxonomy shared by every component.
//!
//! Every failure is a caller contract violation or a missing precondition, so
//! nothing in this crate retries. Errors surface immediately through [`Result`].

use std::fmt;
use std::io;

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, ContinualError>;

/// Everything that can go wrong while vectorizing, extracting or persisting.
#[derive(Debug)]
pub enum ContinualError {
    /// The model exposes no parameters, or repeats a parameter name.
    InvalidModel {
        /// What was wrong with the enumeration.
        reason: String,
    },

    /// A flat vector does not match the trainable element count.
    LengthMismatch {
        /// Sum of trainable element counts.
        expected: usize,
        /// Length of the supplied vector.
        got: usize,
    },

    /// Accumulation was requested onto a parameter with no gradient buffer.
    MissingGradient {
        /// Name of the offending parameter.
        name: String,
    },

    /// Two models do not share a trainable-parameter shape signature.
    IncompatibleModels {
        /// Flat length (or entry description) of the left model.
        left: String,
        /// Flat length (or entry description) of the right model.
        right: String,
    },

    /// An empty batch, or a tensor whose shape disagrees with its use.
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
    },

    /// No snapshot file exists at the resolved slot.
    SnapshotNotFound {
        /// The resolved file path.
        path: String,
    },

    /// A metric-grid task index outside `[1, n_tasks]`.
    IndexOutOfRange {
        /// Offending 1-based index.
        index: usize,
        /// Grid size.
        n_tasks: usize,
    },

    /// Underlying I/O failure.
    Io(io::Error),

    /// A snapshot file failed its integrity checks.
    Corrupt {
        /// What failed to verify.
        msg: &'static str,
    },

    /// The experiment configuration could not be parsed or is invalid.
    Config(String),
}

impl ContinualError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
        }
    }

    pub(crate) fn invalid_model(reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ContinualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidModel { reason } => write!(f, "invalid model: {reason}"),
            Self::LengthMismatch { expected, got } => write!(
                f,
                "flat vector length mismatch: expected {expected} trainable elements, got {got}"
            ),
            Self::MissingGradient { name } => {
                write!(f, "parameter '{name}' has no gradient buffer to accumulate into")
            }
            Self::IncompatibleModels { left, right } => {
                write!(f, "incompatible models: {left} vs {right}")
            }
            Self::ShapeMismatch { context } => write!(f, "shape mismatch: {context}"),
            Self::SnapshotNotFound { path } => write!(f, "snapshot not found at {path}"),
            Self::IndexOutOfRange { index, n_tasks } => {
                write!(f, "task index {index} outside [1, {n_tasks}]")
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Corrupt { msg } => write!(f, "corrupted snapshot: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ContinualError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ContinualError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
