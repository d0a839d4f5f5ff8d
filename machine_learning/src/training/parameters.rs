use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    arch::{Sequential, layers::NormalisationType},
    optimization::{Adalm, Adam, GradientDescent, Optimizer, OptimizerKind, WeightDecay},
};

/// Everything that drives a training run.
///
/// It's persisted next to the checkpoints when a run starts and a resumed run reads that copy
/// back, so the configuration can't drift between restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParameters {
    pub batch_size: usize,
    pub learning_rate: f32,
    /// The `(min, max)` learning rates an adaptive optimizer is kept within.
    pub learning_rate_limits: (f32, f32),
    pub learning_rate_rescale_factor_per_epoch: f32,
    pub momentum: f32,
    pub num_epochs: usize,
    /// Epochs over which the learning rate ramps up linearly to its configured value.
    pub warmup_epochs: usize,
    /// Weight decay strength, zero disables it.
    pub regulariser_lambda: f32,
    /// How many times a failed run is resumed from its last checkpoint before giving up.
    pub max_restarts: usize,
    /// The amount of parallel workers, zero trains on the calling thread.
    pub workers: usize,
    /// Whether to roll back every update that doesn't strictly decrease the batch loss.
    pub monotonic: bool,
    pub dropout_keep_probs: Vec<f32>,
    pub normalisation: NormalisationType,
    pub optimizer: OptimizerKind,
    /// The length of the training loss window watched for plateaus.
    pub history_max_len: usize,
    pub seed: u64,
}

impl Default for TrainingParameters {
    fn default() -> Self {
        Self {
            batch_size: 100,
            learning_rate: 0.001,
            learning_rate_limits: (1e-6, 0.01),
            learning_rate_rescale_factor_per_epoch: 1.5,
            momentum: 0.9,
            num_epochs: 100,
            warmup_epochs: 0,
            regulariser_lambda: 0.,
            max_restarts: 3,
            workers: 0,
            monotonic: false,
            dropout_keep_probs: Vec::new(),
            normalisation: NormalisationType::None,
            optimizer: OptimizerKind::None,
            history_max_len: 100,
            seed: 42,
        }
    }
}

impl TrainingParameters {
    /// Checks that every field is within range.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MlErr::InvalidConfig(msg));

        if self.batch_size == 0 {
            return invalid("batch size must be positive".into());
        }
        if self.num_epochs == 0 {
            return invalid("at least one epoch is needed".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.) {
            return invalid(format!(
                "learning rate must be non negative, got {}",
                self.learning_rate
            ));
        }

        let (min, max) = self.learning_rate_limits;
        if !(min > 0. && min <= max) {
            return invalid(format!(
                "learning rate limits must satisfy 0 < min <= max, got {:?}",
                self.learning_rate_limits
            ));
        }
        if !(self.learning_rate_rescale_factor_per_epoch >= 1.) {
            return invalid(format!(
                "learning rate rescale factor must be at least 1, got {}",
                self.learning_rate_rescale_factor_per_epoch
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if !(self.regulariser_lambda >= 0.) {
            return invalid(format!(
                "regulariser lambda must be non negative, got {}",
                self.regulariser_lambda
            ));
        }
        if let Some(p) = self
            .dropout_keep_probs
            .iter()
            .find(|&&p| !(p > 0. && p <= 1.))
        {
            return invalid(format!("dropout keep probabilities must be in (0, 1], got {p}"));
        }
        if self.history_max_len == 0 {
            return invalid("history length must be positive".into());
        }

        Ok(())
    }

    /// The amount of optimizer updates made on each epoch over `train_set_size` examples.
    pub fn iterations_per_epoch(&self, train_set_size: usize) -> usize {
        train_set_size.div_ceil(self.batch_size.max(1))
    }

    /// The learning rate scale of `epoch` (zero based): `(epoch + 1) / (warmup_epochs + 1)` while
    /// warming up and 1 afterwards.
    pub fn warmup_scale(&self, epoch: usize) -> f32 {
        if epoch < self.warmup_epochs {
            (epoch + 1) as f32 / (self.warmup_epochs + 1) as f32
        } else {
            1.
        }
    }

    /// Builds the configured optimizer for `model`.
    pub fn optimizer(&self, model: &Sequential, train_set_size: usize) -> Result<Box<dyn Optimizer>> {
        let optimizer: Box<dyn Optimizer> = match self.optimizer {
            OptimizerKind::None => Box::new(GradientDescent::new(self.learning_rate)),
            OptimizerKind::Adam => Box::new(Adam::new(model, self.learning_rate)),
            OptimizerKind::Adalm => Box::new(Adalm::new(
                model,
                self.learning_rate,
                self.learning_rate_limits,
                self.learning_rate_rescale_factor_per_epoch,
                self.momentum,
                train_set_size as f32 / self.batch_size.max(1) as f32,
                self.num_epochs,
            )?),
        };

        Ok(optimizer)
    }

    /// The configured regulariser, if any.
    pub fn weight_decay(&self) -> Result<Option<WeightDecay>> {
        if self.regulariser_lambda > 0. {
            WeightDecay::new(self.regulariser_lambda, self.batch_size).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
