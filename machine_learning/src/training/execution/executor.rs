use ndarray::{ArrayView2, ArrayViewD};

use crate::{Gradient, Result, arch::Sequential, dataset::Dataset, optimization::Objective};

/// Computes losses and gradients of a model on batches of data.
///
/// The trainer owns the model and applies every update itself. Executors only decide where the
/// passes run.
pub trait Executor {
    /// The mean batch loss at the model's current parameters, in training mode.
    ///
    /// `seed` seeds the randomness of stochastic layers, two calls with the same seed and
    /// parameters give the same loss.
    fn loss(
        &mut self,
        model: &mut Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
    ) -> Result<f32>;

    /// The mean batch loss and its gradient at the model's current parameters.
    fn loss_and_grad(
        &mut self,
        model: &mut Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
    ) -> Result<(f32, Gradient)>;

    /// Called at the end of every epoch, before the model is evaluated.
    fn end_epoch(&mut self, _model: &mut Sequential, _train: &Dataset) -> Result<()> {
        Ok(())
    }

    /// Releases every resource held. Calling it more than once is a no-op.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The objective of one batch, evaluated through an executor.
pub struct ExecutorObjective<'a, E: ?Sized> {
    executor: &'a mut E,
    x: ArrayViewD<'a, f32>,
    y: ArrayView2<'a, f32>,
    seed: u64,
}

impl<'a, E: Executor + ?Sized> ExecutorObjective<'a, E> {
    pub fn new(
        executor: &'a mut E,
        x: ArrayViewD<'a, f32>,
        y: ArrayView2<'a, f32>,
        seed: u64,
    ) -> Self {
        Self {
            executor,
            x,
            y,
            seed,
        }
    }
}

impl<E: Executor + ?Sized> Objective for ExecutorObjective<'_, E> {
    fn loss(&mut self, model: &mut Sequential) -> Result<f32> {
        self.executor
            .loss(model, self.x.view(), self.y.view(), self.seed)
    }

    fn loss_and_grad(&mut self, model: &mut Sequential) -> Result<(f32, Gradient)> {
        self.executor
            .loss_and_grad(model, self.x.view(), self.y.view(), self.seed)
    }
}
