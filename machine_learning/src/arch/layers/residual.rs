use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};

use super::{Layer, Mode};
use crate::{MlErr, Result, arch::snapshot::LayerSnapshot};

/// A skip connection around an inner chain of layers, `y = f(x) + x`.
#[derive(Debug, Clone)]
pub struct Residual {
    dims: Vec<usize>,
    layers: Vec<Layer>,
    cached: bool,
}

impl Residual {
    /// Creates a new `Residual` block.
    ///
    /// # Arguments
    /// * `layers` - The inner chain, its output dimensions must equal its input dimensions.
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        let (Some(first), Some(last)) = (layers.first(), layers.last()) else {
            return Err(MlErr::InvalidConfig("residual block without layers".into()));
        };

        for pair in layers.windows(2) {
            if pair[0].output_dims() != pair[1].input_dims() {
                return Err(MlErr::DimensionMismatch {
                    layer: pair[1].name(),
                    got: pair[0].output_dims().to_vec(),
                    expected: pair[1].input_dims().to_vec(),
                });
            }
        }

        if first.input_dims() != last.output_dims() {
            return Err(MlErr::DimensionMismatch {
                layer: "residual",
                got: last.output_dims().to_vec(),
                expected: first.input_dims().to_vec(),
            });
        }

        Ok(Self {
            dims: first.input_dims().to_vec(),
            layers,
            cached: false,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn forward(&mut self, x: ArrayD<f32>, mode: &mut Mode<'_>) -> Result<ArrayD<f32>> {
        let mut y = x.clone();
        for layer in &mut self.layers {
            y = layer.forward(y, mode)?;
        }

        self.cached = true;
        Ok(y + &x)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if !std::mem::take(&mut self.cached) {
            return Err(MlErr::EmptyCache { layer: "residual" });
        }

        let mut g = d.clone();
        for layer in self.layers.iter_mut().rev() {
            g = layer.backward(g)?;
        }

        Ok(g + &d)
    }

    pub fn take_grad(&mut self) -> Result<Vec<ArrayD<f32>>> {
        let mut grads = Vec::new();
        for layer in &mut self.layers {
            grads.extend(layer.take_grad()?);
        }

        Ok(grads)
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    pub fn parameter_names(&self) -> Vec<&'static str> {
        self.layers
            .iter()
            .flat_map(|l| l.parameter_names())
            .collect()
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Residual {
            layers: self.layers.iter().map(Layer::snapshot).collect(),
        }
    }

    pub fn clear_cache(&mut self) {
        self.cached = false;
        self.layers.iter_mut().for_each(Layer::clear_cache);
    }
}
