use ndarray::{ArrayView2, ArrayViewD};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Gradient, Result,
    arch::{Sequential, layers::Mode},
};

/// The function an optimizer minimizes, bound to one batch of data.
///
/// Both methods evaluate the loss at the model's *current* parameters, so an optimizer can
/// measure the effect of its own update by calling `loss` again after applying it.
pub trait Objective {
    fn loss(&mut self, model: &mut Sequential) -> Result<f32>;

    fn loss_and_grad(&mut self, model: &mut Sequential) -> Result<(f32, Gradient)>;
}

/// The mean cross entropy of a batch, computed on the model itself in training mode.
///
/// Only the gradient pass moves running statistics, `loss` is a measurement. Every evaluation
/// reseeds the training rng from `seed`, so stochastic layers draw the same
/// randomness before and after an update and the two losses are comparable.
pub struct BatchObjective<'a> {
    x: ArrayViewD<'a, f32>,
    y: ArrayView2<'a, f32>,
    seed: u64,
}

impl<'a> BatchObjective<'a> {
    pub fn new(x: ArrayViewD<'a, f32>, y: ArrayView2<'a, f32>, seed: u64) -> Self {
        Self { x, y, seed }
    }
}

impl Objective for BatchObjective<'_> {
    fn loss(&mut self, model: &mut Sequential) -> Result<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let loss = model.loss(self.x.view(), self.y, &mut Mode::Measure(&mut rng))?;
        model.clear_cache();
        Ok(loss)
    }

    fn loss_and_grad(&mut self, model: &mut Sequential) -> Result<(f32, Gradient)> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        model.loss_and_grad(self.x.view(), self.y, &mut Mode::Train(&mut rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::layers::{Layer, testing::random_input},
        dataset::one_hot,
        initialization::ParamGen,
    };

    #[test]
    fn dropout_draws_the_same_masks_on_every_evaluation() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = Sequential::new([
            Layer::dense((4, 6), ParamGen::Kaiming, &mut rng).unwrap(),
            Layer::dropout(vec![6], 0.5).unwrap(),
            Layer::dense((6, 2), ParamGen::Kaiming, &mut rng).unwrap(),
        ])
        .unwrap();

        let x = random_input(8, &[4], 1);
        let y = one_hot(&[0, 1, 0, 1, 1, 0, 0, 1], 2).unwrap();
        let mut objective = BatchObjective::new(x.view(), y.view(), 17);

        let (a, _) = objective.loss_and_grad(&mut model).unwrap();
        let b = objective.loss(&mut model).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn only_the_gradient_pass_moves_batch_norm_statistics() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = Sequential::new([
            Layer::dense((4, 3), ParamGen::Kaiming, &mut rng).unwrap(),
            Layer::batch_norm(vec![3]).unwrap(),
            Layer::dense((3, 2), ParamGen::Kaiming, &mut rng).unwrap(),
        ])
        .unwrap();
        let running_mean = |model: &Sequential| match &model.layers()[1] {
            Layer::BatchNorm(bn) => bn.running_mean().to_owned(),
            _ => unreachable!(),
        };

        let x = random_input(6, &[4], 2);
        let y = one_hot(&[0, 1, 1, 0, 1, 0], 2).unwrap();
        let mut objective = BatchObjective::new(x.view(), y.view(), 3);
        let initial = running_mean(&model);

        objective.loss(&mut model).unwrap();
        objective.loss(&mut model).unwrap();
        assert_eq!(running_mean(&model), initial);

        objective.loss_and_grad(&mut model).unwrap();
        assert_ne!(running_mean(&model), initial);
    }
}
