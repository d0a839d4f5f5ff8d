use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    /// Two collections that should have the same length don't.
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// Two tensors that should have the same shape don't.
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// A layer received (or was chained to) dimensions it can't work with.
    DimensionMismatch {
        layer: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidConfig(String),
    Shape(ShapeError),
    /// `backward` was called without a preceding `forward`.
    EmptyCache { layer: &'static str },
    /// The parameter gradient of a layer was requested before running `backward`.
    MissingGradient { layer: &'static str },
    /// A NaN or an infinity showed up while training.
    NonFinite { what: &'static str, layer: Option<usize> },
    MissingCheckpoint(PathBuf),
    RestartBudgetExhausted { restarts: usize, reason: String },
    WorkerLost { worker_id: usize },
    Io(io::Error),
    Serialization(serde_json::Error),
}

impl MlErr {
    /// Whether this error comes from the numbers themselves diverging, which is recoverable by
    /// restarting from a checkpoint, as opposed to a configuration or resource failure.
    pub fn is_numerical(&self) -> bool {
        matches!(self, MlErr::NonFinite { .. })
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::DimensionMismatch {
                layer,
                got,
                expected,
            } => write!(
                f,
                "the {layer} layer got dimensions {got:?} but expected {expected:?}"
            ),
            MlErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::EmptyCache { layer } => write!(
                f,
                "tried to run backward on the {layer} layer without a forward pass"
            ),
            MlErr::MissingGradient { layer } => {
                write!(f, "the {layer} layer has no parameter gradient to take")
            }
            MlErr::NonFinite { what, layer: None } => write!(f, "non finite {what}"),
            MlErr::NonFinite {
                what,
                layer: Some(i),
            } => write!(f, "non finite {what} at layer {i}"),
            MlErr::MissingCheckpoint(path) => {
                write!(f, "no checkpoint found at {}", path.display())
            }
            MlErr::RestartBudgetExhausted { restarts, reason } => write!(
                f,
                "training failed after {restarts} restart(s), last reason: {reason}"
            ),
            MlErr::WorkerLost { worker_id } => write!(f, "worker {worker_id} is gone"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Serialization(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Io(e) => Some(e),
            MlErr::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
