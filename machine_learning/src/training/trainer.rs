use std::path::{Path, PathBuf};

use log::{debug, error, info, trace};
use ndarray::{ArrayView2, ArrayViewD};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    AbortReason, CheckpointStore, StabilityGuard, Tracer, TrainingLog, TrainingParameters,
    TrainingResult,
    execution::{Ensemble, Executor, ExecutorObjective, Soloist},
};
use crate::{
    MlErr, Result,
    arch::{Sequential, layers::Mode},
    dataset::Dataset,
    optimization::{Objective, Optimizer, WeightDecay},
};

/// Trains on the calling thread.
pub type BasicTrainer = Trainer<Soloist>;

/// Trains on a pool of workers, each computing the gradient of a shard of every batch.
pub type ParallelTrainer = Trainer<Ensemble>;

/// Drives a model through epochs of mini-batch optimization.
///
/// Every epoch shuffles the training set, makes one optimizer update per batch and then
/// evaluates the model on the training and validation sets. The model is checkpointed whenever
/// its validation loss improves, and numerical failures or a stalled training loss abort the run
/// with a `TrainingResult::Failed` that tells where to resume from.
pub struct Trainer<E: Executor> {
    model: Sequential,
    params: TrainingParameters,
    train_set: Dataset,
    validation_set: Dataset,
    store: CheckpointStore,
    executor: E,
    tracer: Option<Box<dyn Tracer>>,
    attempt: usize,
}

impl BasicTrainer {
    pub fn basic<P: AsRef<Path>>(
        model: Sequential,
        params: TrainingParameters,
        train_set: Dataset,
        validation_set: Dataset,
        run_dir: P,
    ) -> Result<Self> {
        Self::new(model, params, train_set, validation_set, run_dir, Soloist)
    }
}

impl ParallelTrainer {
    /// Creates a trainer with a pool of `params.workers` workers.
    pub fn parallel<P: AsRef<Path>>(
        model: Sequential,
        params: TrainingParameters,
        train_set: Dataset,
        validation_set: Dataset,
        run_dir: P,
    ) -> Result<Self> {
        params.validate()?;
        let params = CheckpointStore::open(&run_dir)?.bind_parameters(params)?;
        let executor = Ensemble::new(&model, params.workers.max(1), params.batch_size)?;

        Self::new(model, params, train_set, validation_set, run_dir, executor)
    }
}

impl<E: Executor> Trainer<E> {
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `params` - The training configuration, superseded by the one persisted in `run_dir`
    ///   if there is one.
    /// * `train_set` - The examples the model is fitted to.
    /// * `validation_set` - The examples that decide when to checkpoint.
    /// * `run_dir` - Where checkpoints, the training parameters and the log are written.
    /// * `executor` - Where the passes of every step run.
    pub fn new<P: AsRef<Path>>(
        model: Sequential,
        params: TrainingParameters,
        train_set: Dataset,
        validation_set: Dataset,
        run_dir: P,
        executor: E,
    ) -> Result<Self> {
        params.validate()?;
        let store = CheckpointStore::open(run_dir)?;
        let params = store.bind_parameters(params)?;

        for (what, set) in [("training set", &train_set), ("validation set", &validation_set)] {
            if set.is_empty() {
                return Err(MlErr::InvalidConfig(format!("the {what} is empty")));
            }
            if set.example_dims() != model.input_dims() {
                return Err(MlErr::ShapeMismatch {
                    what,
                    got: set.example_dims().to_vec(),
                    expected: model.input_dims().to_vec(),
                });
            }
            if set.num_classes() != model.num_classes() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got: set.num_classes(),
                    expected: model.num_classes(),
                });
            }
        }

        Ok(Self {
            model,
            params,
            train_set,
            validation_set,
            store,
            executor,
            tracer: None,
            attempt: 0,
        })
    }

    /// Attaches a tracer that observes every step.
    pub fn with_tracer<T: Tracer + 'static>(mut self, tracer: T) -> Self {
        self.tracer = Some(Box::new(tracer));
        self
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn into_model(self) -> Sequential {
        self.model
    }

    pub fn parameters(&self) -> &TrainingParameters {
        &self.params
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// How many times this run was restarted.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub(super) fn next_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Trains from the first epoch, starting a new log.
    pub fn train(&mut self) -> Result<TrainingResult> {
        info!(
            epochs = self.params.num_epochs,
            examples = self.train_set.len(),
            attempt = self.attempt;
            "training started"
        );

        let checkpoint = self.save_checkpoint()?;
        let log = TrainingLog::create(self.store.log_path())?;
        self.run(0, checkpoint, log)
    }

    /// Continues a run at `start_epoch` from the model saved at `checkpoint`.
    pub fn resume(&mut self, start_epoch: usize, checkpoint: &Path) -> Result<TrainingResult> {
        if start_epoch > self.params.num_epochs {
            return Err(MlErr::InvalidConfig(format!(
                "can't resume at epoch {start_epoch} of {}",
                self.params.num_epochs
            )));
        }

        let model = CheckpointStore::load_model(checkpoint)?;
        self.model.parameters().check_layout(&model.parameters())?;
        self.model = model;

        info!(
            start_epoch = start_epoch,
            attempt = self.attempt,
            checkpoint:% = checkpoint.display();
            "training resumed"
        );

        let log = TrainingLog::resume(self.store.log_path(), start_epoch)?;
        self.run(start_epoch, checkpoint.to_path_buf(), log)
    }

    /// Saves the current model as the run's checkpoint.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        self.store.save_model(&self.model)
    }

    /// The mean cross entropy on the training and validation sets, in evaluation mode.
    pub fn evaluate(&mut self) -> Result<(f32, f32)> {
        let batch_size = self.params.batch_size;
        let training_loss = evaluate(&mut self.model, &self.train_set, batch_size)?;
        let test_loss = evaluate(&mut self.model, &self.validation_set, batch_size)?;

        Ok((training_loss, test_loss))
    }

    /// Releases the executor's resources. Calling it more than once is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        self.executor.shutdown()
    }

    fn run(
        &mut self,
        start_epoch: usize,
        mut checkpoint: PathBuf,
        mut log: TrainingLog,
    ) -> Result<TrainingResult> {
        let mut optimizer = self.params.optimizer(&self.model, self.train_set.len())?;
        let decay = self.params.weight_decay()?;
        let mut guard = StabilityGuard::new(self.params.history_max_len);
        // A resumed run only replaces the checkpoint with a model better than the logged best.
        let mut best_test_loss = log.best_test_loss();
        let mut resume_epoch = start_epoch;

        for epoch in start_epoch..self.params.num_epochs {
            let (training_loss, test_loss) =
                match self.epoch(epoch, optimizer.as_mut(), decay.as_ref()) {
                    Ok(losses) => losses,
                    Err(err) if err.is_numerical() => {
                        let reason = AbortReason::NonFinite(err.to_string());
                        return Ok(self.abort(reason, checkpoint, resume_epoch));
                    }
                    Err(err) => return Err(err),
                };

            let learning_rate = optimizer.learning_rate();
            log.append(epoch + 1, training_loss, test_loss, learning_rate)?;
            info!(
                epoch = epoch + 1,
                training_loss = training_loss,
                test_loss = test_loss,
                learning_rate = learning_rate;
                "epoch finished"
            );

            let report = optimizer.report();
            if !report.is_empty() {
                debug!(epoch = epoch + 1; "{report}");
            }

            if test_loss < best_test_loss {
                best_test_loss = test_loss;
                checkpoint = self.save_checkpoint()?;
                resume_epoch = epoch + 1;
            }

            if guard.push(training_loss) {
                let reason = AbortReason::Plateau {
                    loss: training_loss,
                };
                return Ok(self.abort(reason, checkpoint, resume_epoch));
            }
        }

        info!(
            best_test_loss = best_test_loss,
            checkpoint:% = checkpoint.display();
            "training finished"
        );
        Ok(TrainingResult::Successful { checkpoint })
    }

    fn epoch(
        &mut self,
        epoch: usize,
        optimizer: &mut dyn Optimizer,
        decay: Option<&WeightDecay>,
    ) -> Result<(f32, f32)> {
        let mut rng = StdRng::seed_from_u64(epoch_seed(self.params.seed, epoch, self.attempt));
        let shuffled = self.train_set.shuffled(&mut rng);
        optimizer.scale_learning_rate(self.params.warmup_scale(epoch));

        for (x, y) in shuffled.batches(self.params.batch_size)? {
            let seed = rng.random();
            self.step(epoch, x, y, seed, optimizer, decay)?;
        }

        optimizer.end_epoch();
        self.executor.end_epoch(&mut self.model, &self.train_set)?;

        self.evaluate()
    }

    fn step(
        &mut self,
        epoch: usize,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
        optimizer: &mut dyn Optimizer,
        decay: Option<&WeightDecay>,
    ) -> Result<()> {
        let before = self.params.monotonic.then(|| self.model.parameters());

        let mut batch = ExecutorObjective::new(&mut self.executor, x, y, seed);
        let mut regularised;
        let objective: &mut dyn Objective = match decay {
            Some(decay) => {
                regularised = decay.regularise(&mut batch);
                &mut regularised
            }
            None => &mut batch,
        };

        let step = optimizer.update(&mut self.model, objective)?;

        if let Some(before) = before {
            let loss_after = match step.loss_after {
                Some(loss) => loss,
                None => objective.loss(&mut self.model)?,
            };

            if !(loss_after < step.loss_before) {
                self.model.set_parameters(&before)?;
                trace!(
                    epoch = epoch,
                    loss_before = step.loss_before,
                    loss_after = loss_after;
                    "update rolled back"
                );
            }
        }

        if let Some(tracer) = &mut self.tracer {
            tracer.on_step(epoch, &step.gradient, &step.update);
        }

        Ok(())
    }

    fn abort(&self, reason: AbortReason, checkpoint: PathBuf, resume_epoch: usize) -> TrainingResult {
        error!(
            reason:% = reason,
            checkpoint:% = checkpoint.display(),
            resume_epoch = resume_epoch,
            attempt = self.attempt;
            "training aborted"
        );

        TrainingResult::Failed {
            reason,
            checkpoint: Some(checkpoint),
            resume_epoch,
        }
    }
}

/// The seed of the shuffling and dropout of an epoch.
///
/// It depends on the attempt so that a restarted run doesn't replay the batches that led to
/// its failure.
fn epoch_seed(seed: u64, epoch: usize, attempt: usize) -> u64 {
    seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (attempt as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93)
}

fn evaluate(model: &mut Sequential, set: &Dataset, batch_size: usize) -> Result<f32> {
    let mut total = 0.;
    let mut sum = || -> Result<()> {
        for (x, y) in set.batches(batch_size)? {
            total += model.loss(x, y, &mut Mode::Eval)? * y.nrows() as f32;
        }
        Ok(())
    };

    let res = sum();
    model.clear_cache();
    res?;

    Ok(total / set.len() as f32)
}
