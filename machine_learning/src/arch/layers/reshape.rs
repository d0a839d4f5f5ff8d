use ndarray::{ArrayD, Axis};

use crate::{MlErr, Result, arch::snapshot::LayerSnapshot};

/// Reinterprets the shape of each example, e.g. to flatten convolutional features.
#[derive(Debug, Clone)]
pub struct Reshape {
    input_dims: Vec<usize>,
    output_dims: Vec<usize>,
    batch: Option<usize>,
}

impl Reshape {
    pub fn new(input_dims: Vec<usize>, output_dims: Vec<usize>) -> Result<Self> {
        let (a, b) = (
            input_dims.iter().product::<usize>(),
            output_dims.iter().product::<usize>(),
        );
        if a != b || input_dims.is_empty() || output_dims.is_empty() {
            return Err(MlErr::InvalidConfig(format!(
                "can't reshape {input_dims:?} into {output_dims:?}"
            )));
        }

        Ok(Self {
            input_dims,
            output_dims,
            batch: None,
        })
    }

    /// A reshape into a single feature axis.
    pub fn flatten(input_dims: Vec<usize>) -> Result<Self> {
        let size = input_dims.iter().product();
        Self::new(input_dims, vec![size])
    }

    pub fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    pub fn output_dims(&self) -> &[usize] {
        &self.output_dims
    }

    fn reshape(x: ArrayD<f32>, dims: &[usize]) -> Result<ArrayD<f32>> {
        let mut shape = vec![x.len_of(Axis(0))];
        shape.extend_from_slice(dims);
        Ok(x.into_shape_clone(shape)?)
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.batch = Some(x.len_of(Axis(0)));
        Self::reshape(x, &self.output_dims)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.batch
            .take()
            .ok_or(MlErr::EmptyCache { layer: "reshape" })?;
        Self::reshape(d, &self.input_dims)
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Reshape {
            input_dims: self.input_dims.clone(),
            output_dims: self.output_dims.clone(),
        }
    }

    pub fn clear_cache(&mut self) {
        self.batch = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::{Layer, testing::check_shapes};

    #[test]
    fn flatten_and_back() {
        let layer = Reshape::flatten(vec![2, 3, 4]).unwrap();
        assert_eq!(layer.output_dims(), &[24]);
        check_shapes(Layer::Reshape(layer), 3, false);
    }

    #[test]
    fn element_count_must_match() {
        assert!(Reshape::new(vec![2, 3], vec![5]).is_err());
    }
}
