use log::trace;

use super::{Objective, Optimizer, Step};
use crate::{MlErr, Params, Result, arch::Sequential};

const MOMENTUM_STEP: f32 = 0.05;

/// Gradient descent with momentum and a learning rate that adapts to every step's outcome.
///
/// Each update measures the batch loss before and after being applied. When the loss went down
/// the learning rate grows by a factor `1 + r` and the momentum by `0.05`, otherwise the learning
/// rate shrinks by `1 - 2r` and so does the momentum. `r` is chosen so that `iterations_per_epoch`
/// consecutive improvements rescale the learning rate by `rescale_factor_per_epoch`.
///
/// The learning rate is kept within `[min, ceiling]`, where the ceiling starts at the configured
/// maximum and decays geometrically to the minimum over `num_epochs`.
#[derive(Debug, Clone)]
pub struct Adalm {
    learning_rate: f32,
    scale: f32,
    momentum: f32,
    max_momentum: f32,
    min_learning_rate: f32,
    max_learning_rate: f32,
    ceiling_decay: f32,
    rescale: f32,
    prev_step: Params,
}

impl Adalm {
    /// Creates a new `Adalm` optimizer.
    ///
    /// # Arguments
    /// * `model` - The model to optimize, its parameters give the momentum's layout.
    /// * `learning_rate` - The initial learning rate.
    /// * `learning_rate_limits` - The `(min, max)` learning rates.
    /// * `rescale_factor_per_epoch` - How much an epoch of improvements rescales the learning rate.
    /// * `momentum` - The initial and maximum momentum, in `[0, 1)`.
    /// * `iterations_per_epoch` - The amount of updates made on each epoch.
    /// * `num_epochs` - The amount of epochs over which the ceiling decays to the minimum.
    ///
    /// # Returns
    /// A new `Adalm` or an error if the limits or factors are out of range.
    pub fn new(
        model: &Sequential,
        learning_rate: f32,
        learning_rate_limits: (f32, f32),
        rescale_factor_per_epoch: f32,
        momentum: f32,
        iterations_per_epoch: f32,
        num_epochs: usize,
    ) -> Result<Self> {
        let (min, max) = learning_rate_limits;
        if !(min > 0. && min <= max) {
            return Err(MlErr::InvalidConfig(format!(
                "learning rate limits must satisfy 0 < min <= max, got {learning_rate_limits:?}"
            )));
        }
        if !(rescale_factor_per_epoch >= 1.) {
            return Err(MlErr::InvalidConfig(format!(
                "learning rate rescale factor must be at least 1, got {rescale_factor_per_epoch}"
            )));
        }
        if !(0.0..1.0).contains(&momentum) {
            return Err(MlErr::InvalidConfig(format!(
                "momentum must be in [0, 1), got {momentum}"
            )));
        }
        if !(iterations_per_epoch > 0.) || num_epochs == 0 {
            return Err(MlErr::InvalidConfig(
                "adalm needs at least one iteration and one epoch".into(),
            ));
        }

        Ok(Self {
            learning_rate: learning_rate.clamp(min, max),
            scale: 1.,
            momentum,
            max_momentum: momentum,
            min_learning_rate: min,
            max_learning_rate: max,
            ceiling_decay: ((min.ln() - max.ln()) / num_epochs as f32).exp(),
            rescale: (rescale_factor_per_epoch.ln() / iterations_per_epoch).exp() - 1.,
            prev_step: model.empty_gradient(),
        })
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    /// The current upper limit of the learning rate.
    pub fn ceiling(&self) -> f32 {
        self.max_learning_rate
    }

    fn adapt(&mut self, improved: bool) {
        if improved {
            self.learning_rate *= 1. + self.rescale;
            self.momentum += MOMENTUM_STEP;
        } else {
            self.learning_rate *= (1. - 2. * self.rescale).max(0.);
            self.momentum -= MOMENTUM_STEP;
        }

        self.momentum = self.momentum.clamp(0., self.max_momentum);
        self.learning_rate = self
            .learning_rate
            .clamp(self.min_learning_rate, self.max_learning_rate);
    }
}

impl Optimizer for Adalm {
    fn update(&mut self, model: &mut Sequential, objective: &mut dyn Objective) -> Result<Step> {
        let (loss_before, gradient) = objective.loss_and_grad(model)?;

        let lr = self.learning_rate();
        let mu = self.momentum;
        let step = gradient.zip_map(&self.prev_step, |g, s| lr * (1. - mu) * g + mu * s)?;
        let update = -&step;
        model.update_parameters(&update)?;

        let loss_after = match objective.loss(model) {
            Ok(loss) => loss,
            Err(err) => {
                model.update_parameters(&step)?;
                return Err(err);
            }
        };

        self.prev_step = step;
        self.adapt(loss_after < loss_before);
        trace!(
            loss_before = loss_before,
            loss_after = loss_after,
            lr = self.learning_rate,
            momentum = self.momentum;
            "adalm step"
        );

        Ok(Step {
            loss_before,
            loss_after: Some(loss_after),
            gradient,
            update,
        })
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate * self.scale
    }

    fn scale_learning_rate(&mut self, factor: f32) {
        self.scale = factor;
    }

    fn end_epoch(&mut self) {
        self.max_learning_rate =
            (self.max_learning_rate * self.ceiling_decay).max(self.min_learning_rate);
        self.learning_rate = self.learning_rate.min(self.max_learning_rate);
    }

    fn report(&self) -> String {
        format!(
            "learning rate: {:.10}, maximum learning rate: {:.10}, momentum: {:.2}",
            self.learning_rate, self.max_learning_rate, self.momentum
        )
    }
}
