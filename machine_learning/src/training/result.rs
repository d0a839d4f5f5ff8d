use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

/// Why a training run was aborted.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// A NaN or infinity showed up, the message describes where.
    NonFinite(String),
    /// The training loss flat-lined at a high value.
    Plateau { loss: f32 },
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NonFinite(msg) => write!(f, "numerical failure: {msg}"),
            AbortReason::Plateau { loss } => write!(f, "training loss plateaued at {loss}"),
        }
    }
}

/// How a training run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingResult {
    /// Every epoch ran, `checkpoint` holds the model with the best validation loss.
    Successful { checkpoint: PathBuf },
    /// The run was aborted, it can be resumed at `resume_epoch` from `checkpoint`.
    Failed {
        reason: AbortReason,
        checkpoint: Option<PathBuf>,
        resume_epoch: usize,
    },
}

impl TrainingResult {
    pub fn is_successful(&self) -> bool {
        matches!(self, TrainingResult::Successful { .. })
    }

    pub fn checkpoint(&self) -> Option<&Path> {
        match self {
            TrainingResult::Successful { checkpoint } => Some(checkpoint),
            TrainingResult::Failed { checkpoint, .. } => checkpoint.as_deref(),
        }
    }
}
