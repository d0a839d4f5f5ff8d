use ndarray::{ArrayViewD, ArrayViewMutD, Ix2, linalg, prelude::*};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::snapshot::{LayerSnapshot, TensorSnapshot},
    initialization::ParamGen,
};

/// A fully connected layer, `z = x·W + b`.
///
/// Optimizations:
///   1. Find a way to not copy `x` in each `Dense::forward` call.
#[derive(Debug, Clone)]
pub struct Dense {
    input_dims: Vec<usize>,
    output_dims: Vec<usize>,
    weights: Array2<f32>,
    biases: Array1<f32>,

    // Forward metadata
    x: Option<Array2<f32>>,

    // Backward metadata
    grad: Option<(Array2<f32>, Array1<f32>)>,
}

impl Dense {
    /// Creates a new `Dense` layer with freshly initialized weights and zero biases.
    ///
    /// # Arguments
    /// * `dim` - The input and output sizes.
    /// * `init` - How to draw the initial weights.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// A new `Dense` instance or an error if either size is zero.
    pub fn new<R: Rng + ?Sized>(
        dim: (usize, usize),
        init: ParamGen,
        rng: &mut R,
    ) -> Result<Self> {
        let (n, m) = dim;
        if n == 0 || m == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "dense layer sizes must be positive, got {dim:?}"
            )));
        }

        let weights = init
            .generate(&[n, m], n, m, rng)?
            .into_dimensionality::<Ix2>()?;

        Self::from_parameters(weights, Array1::zeros(m))
    }

    /// Creates a new `Dense` layer from existing parameters.
    ///
    /// # Arguments
    /// * `weights` - A `(n_in, n_out)` matrix.
    /// * `biases` - A vector of `n_out` elements.
    pub fn from_parameters(weights: Array2<f32>, biases: Array1<f32>) -> Result<Self> {
        let (n, m) = weights.dim();
        if biases.len() != m {
            return Err(MlErr::SizeMismatch {
                what: "dense biases",
                got: biases.len(),
                expected: m,
            });
        }

        Ok(Self {
            input_dims: vec![n],
            output_dims: vec![m],
            weights,
            biases,
            x: None,
            grad: None,
        })
    }

    pub fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    pub fn output_dims(&self) -> &[usize] {
        &self.output_dims
    }

    pub fn weights(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    pub fn biases(&self) -> ArrayView1<'_, f32> {
        self.biases.view()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;
        let mut z = Array2::zeros((x.nrows(), self.weights.ncols()));

        linalg::general_mat_mul(1.0, &x, &self.weights, 0.0, &mut z);
        z += &self.biases;

        self.x = Some(x);
        Ok(z.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = self.x.take().ok_or(MlErr::EmptyCache { layer: "dense" })?;
        let d = d.into_dimensionality::<Ix2>()?;

        let mut dw = Array2::zeros(self.weights.raw_dim());
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        let db = d.sum_axis(Axis(0));

        let mut dx = Array2::zeros(x.raw_dim());
        linalg::general_mat_mul(1.0, &d, &self.weights.t(), 0.0, &mut dx);

        self.grad = Some((dw, db));
        Ok(dx.into_dyn())
    }

    pub fn take_grad(&mut self) -> Result<Vec<ArrayD<f32>>> {
        let (dw, db) = self
            .grad
            .take()
            .ok_or(MlErr::MissingGradient { layer: "dense" })?;

        Ok(vec![dw.into_dyn(), db.into_dyn()])
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weights.view().into_dyn(), self.biases.view().into_dyn()]
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.weights.view_mut().into_dyn(),
            self.biases.view_mut().into_dyn(),
        ]
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Dense {
            weights: TensorSnapshot::from_array(&self.weights),
            biases: TensorSnapshot::from_array(&self.biases),
        }
    }

    pub fn clear_cache(&mut self) {
        self.x = None;
        self.grad = None;
    }
}
