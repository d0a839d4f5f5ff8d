//! Epoch-by-epoch training with checkpoints, restarts and optional worker parallelism.

mod checkpoint;
pub mod execution;
mod guard;
mod history;
mod parameters;
mod result;
mod supervisor;
mod tracer;
mod trainer;

pub use checkpoint::CheckpointStore;
pub use guard::StabilityGuard;
pub use history::{LogRow, TrainingLog};
pub use parameters::TrainingParameters;
pub use result::{AbortReason, TrainingResult};
pub use supervisor::supervise;
pub use tracer::{NormTracer, StepNorms, Tracer};
pub use trainer::{BasicTrainer, ParallelTrainer, Trainer};
