//! Where the forward and backward passes of a training step run.

mod ensemble;
mod executor;
mod shard;
mod soloist;

pub use ensemble::Ensemble;
pub use executor::{Executor, ExecutorObjective};
pub use shard::shards;
pub use soloist::Soloist;
