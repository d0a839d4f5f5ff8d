use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use machine_learning::training::TrainingParameters;
use serde::{Deserialize, Serialize};

use super::ModelConfig;
use crate::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetConfig {
    /// Examples given inline, laid out one after the other in row major order.
    Inline {
        data: Vec<f32>,
        example_dims: Vec<usize>,
        labels: Vec<usize>,
        num_classes: usize,
    },
}

fn default_validation_fraction() -> f32 {
    0.2
}

/// Everything needed to run a supervised training from start to finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// The architecture of a new model. Exclusive with `model_path`.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    /// A model saved by an earlier run to keep training. Exclusive with `model`.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub training: TrainingParameters,
    pub dataset: DatasetConfig,
    /// The share of the dataset held out for validation.
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f32,
    /// Where checkpoints, the training log and the parameters snapshot are written.
    pub output_dir: PathBuf,
}

impl RunConfig {
    pub fn read(path: &Path) -> Result<Self, OrchestratorError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
