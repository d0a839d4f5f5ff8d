use ndarray::{ArrayD, IxDyn};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// How the initial values of a parameter tensor are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamGen {
    Const {
        value: f32,
    },
    Uniform {
        low: f32,
        high: f32,
    },
    Normal {
        mean: f32,
        std_dev: f32,
    },
    /// Normal with standard deviation `sqrt(2 / fan_in)`.
    #[default]
    Kaiming,
    /// Normal with standard deviation `sqrt(2 / (fan_in + fan_out))`.
    Xavier,
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))`.
    XavierUniform,
}

impl ParamGen {
    /// Generates a new tensor.
    ///
    /// # Arguments
    /// * `shape` - The shape of the tensor to generate.
    /// * `fan_in` - The number of input units feeding each output of the layer.
    /// * `fan_out` - The number of output units of the layer.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The generated tensor, or an invalid config error if the distribution can't be built.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        shape: &[usize],
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        let shape = IxDyn(shape);

        let tensor = match *self {
            ParamGen::Const { value } => ArrayD::from_elem(shape, value),
            ParamGen::Uniform { low, high } => {
                ArrayD::random_using(shape, uniform(low, high)?, rng)
            }
            ParamGen::Normal { mean, std_dev } => {
                ArrayD::random_using(shape, normal(mean, std_dev)?, rng)
            }
            ParamGen::Kaiming => {
                let std_dev = (2. / fan_in.max(1) as f32).sqrt();
                ArrayD::random_using(shape, normal(0., std_dev)?, rng)
            }
            ParamGen::Xavier => {
                let std_dev = (2. / (fan_in + fan_out).max(1) as f32).sqrt();
                ArrayD::random_using(shape, normal(0., std_dev)?, rng)
            }
            ParamGen::XavierUniform => {
                let range = (6. / (fan_in + fan_out).max(1) as f32).sqrt();
                ArrayD::random_using(shape, uniform(-range, range)?, rng)
            }
        };

        Ok(tensor)
    }
}

fn normal(mean: f32, std_dev: f32) -> Result<Normal<f32>> {
    Normal::new(mean, std_dev)
        .map_err(|e| MlErr::InvalidConfig(format!("normal({mean}, {std_dev}): {e}")))
}

fn uniform(low: f32, high: f32) -> Result<Uniform<f32>> {
    Uniform::new(low, high)
        .map_err(|e| MlErr::InvalidConfig(format!("uniform({low}, {high}): {e}")))
}
