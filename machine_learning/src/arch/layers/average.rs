use ndarray::{ArrayD, Axis, IxDyn};

use crate::{MlErr, Result, arch::snapshot::LayerSnapshot};

/// Averages each example over some of its axes.
///
/// The backward pass spreads the incoming gradient evenly over the reduced positions, that is,
/// every one of them receives `d / reduced_size`.
#[derive(Debug, Clone)]
pub struct Average {
    input_dims: Vec<usize>,
    output_dims: Vec<usize>,
    axes: Vec<usize>,
    batch: Option<usize>,
}

impl Average {
    /// Creates a new `Average` layer.
    ///
    /// # Arguments
    /// * `input_dims` - The dimensions of each example.
    /// * `axes` - The example axes (not counting the batch axis) to average over.
    ///
    /// # Returns
    /// A new `Average` or an invalid config error if `axes` is empty, repeats an axis, names an
    /// axis out of range or reduces every axis.
    pub fn new(input_dims: Vec<usize>, mut axes: Vec<usize>) -> Result<Self> {
        let given = axes.len();
        axes.sort_unstable();
        axes.dedup();

        if axes.len() != given {
            return Err(MlErr::InvalidConfig(format!(
                "average axes can't repeat, got {given} axes of which {} are distinct",
                axes.len()
            )));
        }
        if axes.is_empty() {
            return Err(MlErr::InvalidConfig("average needs at least one axis".into()));
        }
        if let Some(&axis) = axes.iter().find(|&&a| a >= input_dims.len()) {
            return Err(MlErr::InvalidConfig(format!(
                "average axis {axis} is out of range for dimensions {input_dims:?}"
            )));
        }
        if axes.len() == input_dims.len() {
            return Err(MlErr::InvalidConfig(format!(
                "average can't reduce every axis of {input_dims:?}"
            )));
        }

        let output_dims = input_dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect();

        Ok(Self {
            input_dims,
            output_dims,
            axes,
            batch: None,
        })
    }

    pub fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    pub fn output_dims(&self) -> &[usize] {
        &self.output_dims
    }

    fn reduced_size(&self) -> usize {
        self.axes.iter().map(|&a| self.input_dims[a]).product()
    }

    pub fn forward(&mut self, mut x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let batch = x.len_of(Axis(0));

        for &axis in self.axes.iter().rev() {
            x = x
                .mean_axis(Axis(axis + 1))
                .ok_or_else(|| MlErr::InvalidConfig(format!("axis {axis} is empty")))?;
        }

        self.batch = Some(batch);
        Ok(x)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let batch = self
            .batch
            .take()
            .ok_or(MlErr::EmptyCache { layer: "average" })?;

        let mut d = d / self.reduced_size() as f32;
        for &axis in &self.axes {
            d = d.insert_axis(Axis(axis + 1));
        }

        let mut shape = vec![batch];
        shape.extend_from_slice(&self.input_dims);

        let spread = d.broadcast(IxDyn(&shape)).ok_or_else(|| MlErr::ShapeMismatch {
            what: "average gradient",
            got: d.shape().to_vec(),
            expected: shape.clone(),
        })?;

        Ok(spread.to_owned())
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Average {
            input_dims: self.input_dims.clone(),
            axes: self.axes.clone(),
        }
    }

    pub fn clear_cache(&mut self) {
        self.batch = None;
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::layers::{
        Layer,
        testing::{check_gradients, check_shapes, random_input},
    };

    #[test]
    fn averages_over_the_given_axes() {
        let mut layer = Average::new(vec![2, 2], vec![1]).unwrap();
        let y = layer
            .forward(array![[[1., 3.], [5., 7.]]].into_dyn())
            .unwrap();

        assert_eq!(y, array![[2., 6.]].into_dyn());
        assert_eq!(layer.output_dims(), &[2]);
    }

    #[test]
    fn backward_spreads_the_gradient_evenly() {
        let mut layer = Average::new(vec![2, 3, 4], vec![0, 2]).unwrap();
        layer.forward(random_input(1, &[2, 3, 4], 1)).unwrap();

        let dx = layer.backward(ArrayD::ones(IxDyn(&[1, 3]))).unwrap();
        assert_eq!(dx.shape(), &[1, 2, 3, 4]);
        assert!(dx.iter().all(|&v| (v - 1. / 8.).abs() < 1e-7));
    }

    #[test]
    fn gradients() {
        let layer = Layer::Average(Average::new(vec![3, 2], vec![0]).unwrap());
        check_shapes(layer.clone(), 4, false);
        check_gradients(layer, random_input(2, &[3, 2], 2), false, 1e-2);
    }

    #[test]
    fn invalid_axes() {
        assert!(Average::new(vec![2, 2], vec![]).is_err());
        assert!(Average::new(vec![2, 2], vec![2]).is_err());
        assert!(Average::new(vec![2, 2], vec![0, 1]).is_err());
        assert!(Average::new(vec![2, 2], vec![1, 1]).is_err());
        assert!(Average::new(vec![2, 3, 4], vec![2, 0, 2]).is_err());
        assert!(Average::new(vec![2, 3, 4], vec![2, 0]).is_ok());
    }
}
