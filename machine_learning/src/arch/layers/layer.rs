use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use rand::Rng;

use super::{
    Activation, Average, BatchNorm, Convolution, Dense, Dropout, LayerNorm, MaxPool, Mode,
    Reshape, Residual,
};
use crate::{
    MlErr, Result,
    arch::{activations::ActFn, snapshot::LayerSnapshot},
    initialization::ParamGen,
};

/// Every kind of layer a model can be built from.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Activation(Activation),
    Dropout(Dropout),
    LayerNorm(LayerNorm),
    BatchNorm(BatchNorm),
    Average(Average),
    Convolution(Convolution),
    MaxPool(MaxPool),
    Reshape(Reshape),
    Residual(Residual),
}
use Layer::*;

impl Layer {
    pub fn dense<R: Rng + ?Sized>(dim: (usize, usize), init: ParamGen, rng: &mut R) -> Result<Self> {
        Ok(Dense(Dense::new(dim, init, rng)?))
    }

    pub fn activation(dims: Vec<usize>, act_fn: ActFn) -> Self {
        Activation(Activation::new(dims, act_fn))
    }

    pub fn dropout(dims: Vec<usize>, keep_prob: f32) -> Result<Self> {
        Ok(Dropout(Dropout::new(dims, keep_prob)?))
    }

    pub fn layer_norm(dims: Vec<usize>) -> Result<Self> {
        Ok(LayerNorm(LayerNorm::new(dims)?))
    }

    pub fn batch_norm(dims: Vec<usize>) -> Result<Self> {
        Ok(BatchNorm(BatchNorm::new(dims)?))
    }

    pub fn average(input_dims: Vec<usize>, axes: Vec<usize>) -> Result<Self> {
        Ok(Average(Average::new(input_dims, axes)?))
    }

    pub fn convolution<R: Rng + ?Sized>(
        input_dims: &[usize],
        n_kernels: usize,
        kernel_size: (usize, usize),
        init: ParamGen,
        rng: &mut R,
    ) -> Result<Self> {
        let conv = Convolution::new(input_dims, n_kernels, kernel_size, init, rng)?;
        Ok(Convolution(conv))
    }

    pub fn max_pool(input_dims: &[usize], size: usize) -> Result<Self> {
        Ok(MaxPool(MaxPool::new(input_dims, size)?))
    }

    pub fn flatten(input_dims: Vec<usize>) -> Result<Self> {
        Ok(Reshape(Reshape::flatten(input_dims)?))
    }

    pub fn residual(layers: Vec<Layer>) -> Result<Self> {
        Ok(Residual(Residual::new(layers)?))
    }

    /// A short name for the kind of layer, used in errors and parameter names.
    pub fn name(&self) -> &'static str {
        match self {
            Dense(_) => "dense",
            Activation(_) => "activation",
            Dropout(_) => "dropout",
            LayerNorm(_) => "layer norm",
            BatchNorm(_) => "batch norm",
            Average(_) => "average",
            Convolution(_) => "convolution",
            MaxPool(_) => "max pool",
            Reshape(_) => "reshape",
            Residual(_) => "residual",
        }
    }

    pub fn input_dims(&self) -> &[usize] {
        match self {
            Dense(l) => l.input_dims(),
            Activation(l) => l.dims(),
            Dropout(l) => l.dims(),
            LayerNorm(l) => l.dims(),
            BatchNorm(l) => l.dims(),
            Average(l) => l.input_dims(),
            Convolution(l) => l.input_dims(),
            MaxPool(l) => l.input_dims(),
            Reshape(l) => l.input_dims(),
            Residual(l) => l.dims(),
        }
    }

    pub fn output_dims(&self) -> &[usize] {
        match self {
            Dense(l) => l.output_dims(),
            Activation(l) => l.dims(),
            Dropout(l) => l.dims(),
            LayerNorm(l) => l.dims(),
            BatchNorm(l) => l.dims(),
            Average(l) => l.output_dims(),
            Convolution(l) => l.output_dims(),
            MaxPool(l) => l.output_dims(),
            Reshape(l) => l.output_dims(),
            Residual(l) => l.dims(),
        }
    }

    /// Makes a forward pass through the layer, caching what the backward pass will need.
    ///
    /// # Arguments
    /// * `x` - A batch of inputs, shaped `(batch, *input_dims)`.
    /// * `mode` - Whether this pass is part of training.
    ///
    /// # Returns
    /// The batch of outputs, shaped `(batch, *output_dims)`.
    pub fn forward(&mut self, x: ArrayD<f32>, mode: &mut Mode<'_>) -> Result<ArrayD<f32>> {
        if x.ndim() == 0 || &x.shape()[1..] != self.input_dims() {
            return Err(MlErr::DimensionMismatch {
                layer: self.name(),
                got: x.shape().iter().skip(1).copied().collect(),
                expected: self.input_dims().to_vec(),
            });
        }

        match self {
            Dense(l) => l.forward(x),
            Activation(l) => Ok(l.forward(x)),
            Dropout(l) => l.forward(x, mode),
            LayerNorm(l) => l.forward(x),
            BatchNorm(l) => l.forward(x, mode),
            Average(l) => l.forward(x),
            Convolution(l) => l.forward(x),
            MaxPool(l) => l.forward(x),
            Reshape(l) => l.forward(x),
            Residual(l) => l.forward(x, mode),
        }
    }

    /// Makes a backward pass through the layer, consuming the cache of the last forward pass.
    ///
    /// Layers with parameters keep their gradient until `take_grad` is called.
    ///
    /// # Arguments
    /// * `d` - The gradient of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's input.
    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Dense(l) => l.backward(d),
            Activation(l) => l.backward(d),
            Dropout(l) => l.backward(d),
            LayerNorm(l) => l.backward(d),
            BatchNorm(l) => l.backward(d),
            Average(l) => l.backward(d),
            Convolution(l) => l.backward(d),
            MaxPool(l) => l.backward(d),
            Reshape(l) => l.backward(d),
            Residual(l) => l.backward(d),
        }
    }

    /// Takes the parameter gradient computed by the last backward pass, in the same order as
    /// `parameters`. Layers without parameters yield an empty list.
    pub fn take_grad(&mut self) -> Result<Vec<ArrayD<f32>>> {
        match self {
            Dense(l) => l.take_grad(),
            LayerNorm(l) => l.take_grad(),
            BatchNorm(l) => l.take_grad(),
            Convolution(l) => l.take_grad(),
            Residual(l) => l.take_grad(),
            _ => Ok(Vec::new()),
        }
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        match self {
            Dense(l) => l.parameters(),
            LayerNorm(l) => l.parameters(),
            BatchNorm(l) => l.parameters(),
            Convolution(l) => l.parameters(),
            Residual(l) => l.parameters(),
            _ => Vec::new(),
        }
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        match self {
            Dense(l) => l.parameters_mut(),
            LayerNorm(l) => l.parameters_mut(),
            BatchNorm(l) => l.parameters_mut(),
            Convolution(l) => l.parameters_mut(),
            Residual(l) => l.parameters_mut(),
            _ => Vec::new(),
        }
    }

    /// The names of the tensors returned by `parameters`, in the same order.
    pub fn parameter_names(&self) -> Vec<&'static str> {
        match self {
            Dense(_) => vec!["weights", "biases"],
            LayerNorm(_) | BatchNorm(_) => vec!["gamma", "beta"],
            Convolution(_) => vec!["kernels", "biases"],
            Residual(l) => l.parameter_names(),
            _ => Vec::new(),
        }
    }

    /// Pairs every parameter tensor with its name.
    pub fn named_parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        self.parameter_names()
            .into_iter()
            .zip(self.parameters())
            .collect()
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        match self {
            Dense(l) => l.snapshot(),
            Activation(l) => l.snapshot(),
            Dropout(l) => l.snapshot(),
            LayerNorm(l) => l.snapshot(),
            BatchNorm(l) => l.snapshot(),
            Average(l) => l.snapshot(),
            Convolution(l) => l.snapshot(),
            MaxPool(l) => l.snapshot(),
            Reshape(l) => l.snapshot(),
            Residual(l) => l.snapshot(),
        }
    }

    /// Drops every cached activation and gradient.
    pub fn clear_cache(&mut self) {
        match self {
            Dense(l) => l.clear_cache(),
            Activation(l) => l.clear_cache(),
            Dropout(l) => l.clear_cache(),
            LayerNorm(l) => l.clear_cache(),
            BatchNorm(l) => l.clear_cache(),
            Average(l) => l.clear_cache(),
            Convolution(l) => l.clear_cache(),
            MaxPool(l) => l.clear_cache(),
            Reshape(l) => l.clear_cache(),
            Residual(l) => l.clear_cache(),
        }
    }

    pub fn has_batch_norm(&self) -> bool {
        match self {
            BatchNorm(_) => true,
            Residual(l) => l.layers().iter().any(Layer::has_batch_norm),
            _ => false,
        }
    }
}
