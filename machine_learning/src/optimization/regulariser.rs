use ndarray::ArrayD;

use super::Objective;
use crate::{Gradient, MlErr, Result, arch::Sequential};

/// L2 regularisation of the weights and kernels of a model.
///
/// Adds `(λ / 2n)·ΣW²` to the loss and therefore `(λ / n)·W` to the gradient of every decayed
/// tensor, `n` being the batch size. Biases and normalisation parameters aren't decayed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightDecay {
    lambda: f32,
    batch_size: usize,
}

impl WeightDecay {
    pub fn new(lambda: f32, batch_size: usize) -> Result<Self> {
        if !(lambda >= 0.) || batch_size == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "weight decay needs a non negative lambda and a positive batch size, got {lambda} and {batch_size}"
            )));
        }

        Ok(Self { lambda, batch_size })
    }

    fn decays(name: &str) -> bool {
        matches!(name, "weights" | "kernels")
    }

    fn k(&self) -> f32 {
        self.lambda / self.batch_size as f32
    }

    /// The penalty added to the loss.
    pub fn penalty(&self, model: &Sequential) -> f32 {
        let squares: f32 = model
            .layers()
            .iter()
            .flat_map(|l| l.named_parameters())
            .filter(|(name, _)| Self::decays(name))
            .map(|(_, w)| w.iter().map(|w| w * w).sum::<f32>())
            .sum();

        self.k() / 2. * squares
    }

    /// The gradient of the penalty, laid out like the model's parameters.
    pub fn gradient(&self, model: &Sequential) -> Gradient {
        let k = self.k();

        model
            .layers()
            .iter()
            .flat_map(|l| l.named_parameters())
            .map(|(name, w)| {
                if Self::decays(name) {
                    w.mapv(|w| k * w)
                } else {
                    ArrayD::zeros(w.raw_dim())
                }
            })
            .collect()
    }

    /// Wraps `objective` so that it includes the penalty.
    pub fn regularise<'o>(&self, objective: &'o mut dyn Objective) -> Regularised<'o> {
        Regularised {
            inner: objective,
            decay: *self,
        }
    }
}

/// An objective with weight decay added on top.
pub struct Regularised<'o> {
    inner: &'o mut dyn Objective,
    decay: WeightDecay,
}

impl Objective for Regularised<'_> {
    fn loss(&mut self, model: &mut Sequential) -> Result<f32> {
        Ok(self.inner.loss(model)? + self.decay.penalty(model))
    }

    fn loss_and_grad(&mut self, model: &mut Sequential) -> Result<(f32, Gradient)> {
        let (loss, grad) = self.inner.loss_and_grad(model)?;
        let grad = grad.try_add(&self.decay.gradient(model))?;

        Ok((loss + self.decay.penalty(model), grad))
    }
}
