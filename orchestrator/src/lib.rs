pub mod configs;
pub mod error;

use std::path::PathBuf;

use log::info;
use machine_learning::{
    dataset::Dataset,
    training::{
        BasicTrainer, CheckpointStore, ParallelTrainer, Trainer, execution::Executor, supervise,
    },
};

use configs::{Adapter, RunConfig};

pub use error::OrchestratorError;

/// How a supervised run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// The checkpoint of the best model.
    pub checkpoint: PathBuf,
    /// How many times the run was restarted.
    pub restarts: usize,
    /// The accuracy of the best model on the validation set.
    pub validation_accuracy: f32,
}

/// Runs a supervised training as configured, restarting it from its last checkpoint when it
/// diverges, until it succeeds or runs out of restarts.
///
/// The training parameters persisted in the output directory by an earlier run take precedence
/// over the configured ones.
///
/// # Errors
/// Returns an `OrchestratorError` if the configuration is invalid or training fails for good.
pub fn train(config: RunConfig) -> Result<Report, OrchestratorError> {
    let store = CheckpointStore::open(&config.output_dir)?;
    let training = store.bind_parameters(config.training.clone())?;

    info!("adapting configs");
    let (model, train_set, validation_set) = Adapter::new().adapt_configs(&config, &training)?;
    info!(
        train = train_set.len(),
        validation = validation_set.len(),
        parameters = model.size(),
        workers = training.workers;
        "starting training"
    );

    if training.workers > 0 {
        let mut trainer = ParallelTrainer::parallel(
            model,
            training,
            train_set,
            validation_set.clone(),
            &config.output_dir,
        )?;
        report(&mut trainer, &validation_set)
    } else {
        let mut trainer = BasicTrainer::basic(
            model,
            training,
            train_set,
            validation_set.clone(),
            &config.output_dir,
        )?;
        report(&mut trainer, &validation_set)
    }
}

fn report<E: Executor>(
    trainer: &mut Trainer<E>,
    validation_set: &Dataset,
) -> Result<Report, OrchestratorError> {
    let checkpoint = supervise(trainer)?;

    let mut best = CheckpointStore::load_model(&checkpoint)?;
    let validation_accuracy = best.accuracy(validation_set.x(), validation_set.y())?;

    info!(
        checkpoint:? = checkpoint,
        restarts = trainer.attempt(),
        accuracy = validation_accuracy;
        "training finished"
    );

    Ok(Report {
        checkpoint,
        restarts: trainer.attempt(),
        validation_accuracy,
    })
}

#[cfg(test)]
mod tests {
    use machine_learning::{
        arch::activations::ActFn,
        initialization::ParamGen,
        optimization::OptimizerKind,
        training::{TrainingLog, TrainingParameters},
    };
    use tempfile::tempdir;

    use super::*;
    use crate::configs::{DatasetConfig, ModelConfig};

    /// Points labelled by the quadrant they fall in.
    fn quadrants(n: usize) -> DatasetConfig {
        let mut data = Vec::with_capacity(n * 2);
        let mut labels = Vec::with_capacity(n);

        for i in 0..n {
            let x = ((i * 7) % 11) as f32 / 5. - 1.;
            let y = ((i * 5) % 13) as f32 / 6. - 1.;
            data.extend([x, y]);
            labels.push(usize::from(x > 0.) * 2 + usize::from(y > 0.));
        }

        DatasetConfig::Inline {
            data,
            example_dims: vec![2],
            labels,
            num_classes: 4,
        }
    }

    fn config(workers: usize, output_dir: PathBuf) -> RunConfig {
        RunConfig {
            model: Some(ModelConfig::Mlp {
                dims: vec![2, 16, 4],
                act_fn: ActFn::Relu,
                init: ParamGen::Kaiming,
            }),
            model_path: None,
            training: TrainingParameters {
                batch_size: 16,
                learning_rate: 0.01,
                num_epochs: 4,
                optimizer: OptimizerKind::Adam,
                workers,
                ..TrainingParameters::default()
            },
            dataset: quadrants(120),
            validation_fraction: 0.25,
            output_dir,
        }
    }

    #[test]
    fn a_healthy_run_reports_its_best_checkpoint() {
        let dir = tempdir().unwrap();

        let report = train(config(0, dir.path().to_path_buf())).unwrap();

        assert_eq!(report.restarts, 0);
        assert!(report.checkpoint.exists());
        assert!((0. ..=1.).contains(&report.validation_accuracy));

        let rows = TrainingLog::rows(&dir.path().join("training_log.csv")).unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn workers_switch_to_parallel_training() {
        let dir = tempdir().unwrap();

        let report = train(config(2, dir.path().to_path_buf())).unwrap();

        assert_eq!(report.restarts, 0);
        assert!(report.checkpoint.exists());
    }

    #[test]
    fn invalid_configs_never_start_training() {
        let dir = tempdir().unwrap();
        let config = RunConfig {
            validation_fraction: 1.5,
            ..config(0, dir.path().to_path_buf())
        };

        assert!(matches!(
            train(config),
            Err(OrchestratorError::InvalidConfig(_))
        ));
        assert!(!dir.path().join("training_log.csv").exists());
    }
}
