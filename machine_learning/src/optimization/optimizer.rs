use serde::{Deserialize, Serialize};

use super::Objective;
use crate::{Gradient, Params, Result, arch::Sequential};

/// The outcome of a single optimization step.
#[derive(Debug, Clone)]
pub struct Step {
    /// The batch loss at the parameters the step started from.
    pub loss_before: f32,
    /// The batch loss after the update, when the optimizer measured it.
    pub loss_after: Option<f32>,
    pub gradient: Gradient,
    /// The delta that was added to the model's parameters.
    pub update: Params,
}

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer: Send {
    /// Makes one step: asks `objective` for the loss and gradient at the model's current
    /// parameters, turns the gradient into an update and applies it to `model`.
    ///
    /// # Arguments
    /// * `model` - The model whose parameters are updated.
    /// * `objective` - The loss being minimized, bound to the current batch.
    ///
    /// # Returns
    /// The step taken or the error raised while computing it, in which case the model is left
    /// untouched.
    fn update(&mut self, model: &mut Sequential, objective: &mut dyn Objective) -> Result<Step>;

    /// The learning rate of the next step, scale included.
    fn learning_rate(&self) -> f32;

    /// Scales the learning rate of the following steps by `factor`, replacing the previous
    /// scale. Adaptive optimizers keep adapting their unscaled rate.
    fn scale_learning_rate(&mut self, factor: f32);

    /// Called once after the last step of every epoch.
    fn end_epoch(&mut self) {}

    /// A short human readable description of the optimizer's state.
    fn report(&self) -> String {
        format!("learning rate: {:.10}", self.learning_rate())
    }
}

/// The optimizers a training run can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Plain gradient descent.
    #[default]
    None,
    Adam,
    Adalm,
}
