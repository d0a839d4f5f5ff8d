use super::{Objective, Optimizer, Step};
use crate::{Params, Result, arch::Sequential};

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    scale: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    m: Params,
    v: Params,
    epsilon: f32,
}

impl Adam {
    pub const BETA1: f32 = 0.9;
    pub const BETA2: f32 = 0.999;
    pub const EPSILON: f32 = 1e-8;

    /// Creates a new `Adam` optimizer with the usual hyperparameters.
    ///
    /// # Arguments
    /// * `model` - The model to optimize, its parameters give the moments' layout.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    pub fn new(model: &Sequential, learning_rate: f32) -> Self {
        Self::with_hyperparameters(model, learning_rate, Self::BETA1, Self::BETA2, Self::EPSILON)
    }

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `model` - The model to optimize, its parameters give the moments' layout.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn with_hyperparameters(
        model: &Sequential,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Self {
        Self {
            learning_rate,
            scale: 1.,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            m: model.empty_gradient(),
            v: model.empty_gradient(),
            epsilon,
        }
    }

    /// The bias corrected first and second moments.
    pub fn corrected_moments(&self) -> (Params, Params) {
        (
            &self.m / (1. - self.beta1_t),
            &self.v / (1. - self.beta2_t),
        )
    }
}

impl Optimizer for Adam {
    fn update(&mut self, model: &mut Sequential, objective: &mut dyn Objective) -> Result<Step> {
        let (loss, gradient) = objective.loss_and_grad(model)?;

        let Self {
            learning_rate,
            scale,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        let m = self.m.zip_map(&gradient, |m, g| b1 * m + (1. - b1) * g)?;
        let v = self.v.zip_map(&gradient, |v, g| b2 * v + (1. - b2) * g * g)?;

        let lr = learning_rate * scale;
        let bc1 = 1. - self.beta1_t * b1;
        let bc2 = 1. - self.beta2_t * b2;
        let update = m.zip_map(&v, |m, v| -lr * (m / bc1) / ((v / bc2).sqrt() + eps))?;
        model.update_parameters(&update)?;

        self.m = m;
        self.v = v;
        self.beta1_t *= b1;
        self.beta2_t *= b2;

        Ok(Step {
            loss_before: loss,
            loss_after: None,
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
}
