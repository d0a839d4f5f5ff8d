mod adapter;
mod model;
mod run;

pub use adapter::Adapter;
pub use model::{LayerConfig, ModelConfig};
pub use run::{DatasetConfig, RunConfig};
