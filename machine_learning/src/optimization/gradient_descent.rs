use super::{Objective, Optimizer, Step};
use crate::{Result, arch::Sequential};

/// Gradient descent optimization algorithm, the default when no optimizer is configured.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
    scale: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            scale: 1.,
        }
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update(&mut self, model: &mut Sequential, objective: &mut dyn Objective) -> Result<Step> {
        let (loss, gradient) = objective.loss_and_grad(model)?;
        let update = &gradient * -self.learning_rate();
        model.update_parameters(&update)?;

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

    fn report(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::layers::{Layer, testing::random_input},
        dataset::one_hot,
        initialization::ParamGen,
        optimization::BatchObjective,
    };

    #[test]
    fn steps_against_the_gradient() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut model =
            Sequential::new([Layer::dense((3, 2), ParamGen::Kaiming, &mut rng).unwrap()]).unwrap();
        let x = random_input(4, &[3], 1);
        let y = one_hot(&[0, 1, 1, 0], 2).unwrap();
        let before = model.parameters();

        let mut optimizer = GradientDescent::new(0.1);
        let step = optimizer
            .update(&mut model, &mut BatchObjective::new(x.view(), y.view(), 0))
            .unwrap();

        let expected = before.try_sub(&(&step.gradient * 0.1)).unwrap();
        for (a, b) in model.parameters().iter().zip(expected.iter()) {
            for (a, b) in a.iter().zip(b.iter()) {
                assert!((a - b).abs() < 1e-6);
            }
        }
        assert!(step.loss_after.is_none());
    }

    #[test]
    fn scaled_steps_are_shorter() {
        let mut rng = StdRng::seed_from_u64(0);
        let model =
            Sequential::new([Layer::dense((3, 2), ParamGen::Kaiming, &mut rng).unwrap()]).unwrap();
        let x = random_input(4, &[3], 1);
        let y = one_hot(&[0, 1, 1, 0], 2).unwrap();

        let mut full = GradientDescent::new(0.1);
        let mut warming = GradientDescent::new(0.1);
        warming.scale_learning_rate(0.25);
        assert!((warming.learning_rate() - 0.025).abs() < 1e-9);

        let a = full
            .update(&mut model.clone(), &mut BatchObjective::new(x.view(), y.view(), 0))
            .unwrap();
        let b = warming
            .update(&mut model.clone(), &mut BatchObjective::new(x.view(), y.view(), 0))
            .unwrap();

        for (a, b) in a.update.iter().zip(b.update.iter()) {
            for (a, b) in a.iter().zip(b.iter()) {
                assert!((a * 0.25 - b).abs() < 1e-7);
            }
        }
    }
}
