use ndarray::{Array, ArrayBase, ArrayD, Data, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

use super::{
    activations::ActFn,
    layers::{
        Activation, Average, BatchNorm, Convolution, Dense, Dropout, Layer, LayerNorm, MaxPool,
        Reshape, Residual,
    },
};
use crate::{MlErr, Result};

/// The current version of the model file format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A tensor as stored in a model file.
///
/// Values are kept as their raw `f32` bit patterns so that loading a model gives back exactly the
/// same numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSnapshot {
    pub shape: Vec<usize>,
    pub bits: Vec<u32>,
}

impl TensorSnapshot {
    pub fn from_array<S, D>(a: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let values: Vec<f32> = a.iter().copied().collect();

        Self {
            shape: a.shape().to_vec(),
            bits: bytemuck::cast_slice(values.as_slice()).to_vec(),
        }
    }

    pub fn to_array<D: Dimension>(&self) -> Result<Array<f32, D>> {
        let values: Vec<f32> = bytemuck::cast_slice(self.bits.as_slice()).to_vec();
        let array = ArrayD::from_shape_vec(IxDyn(&self.shape), values)?;
        Ok(array.into_dimensionality::<D>()?)
    }
}

/// A layer as stored in a model file, tagged by its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSnapshot {
    Dense {
        weights: TensorSnapshot,
        biases: TensorSnapshot,
    },
    Activation {
        dims: Vec<usize>,
        act_fn: ActFn,
    },
    Dropout {
        dims: Vec<usize>,
        keep_prob: f32,
    },
    LayerNorm {
        gamma: TensorSnapshot,
        beta: TensorSnapshot,
    },
    BatchNorm {
        gamma: TensorSnapshot,
        beta: TensorSnapshot,
        running_mean: TensorSnapshot,
        running_var: TensorSnapshot,
        momentum: f32,
    },
    Average {
        input_dims: Vec<usize>,
        axes: Vec<usize>,
    },
    Convolution {
        input_dims: Vec<usize>,
        kernels: TensorSnapshot,
        biases: TensorSnapshot,
    },
    MaxPool {
        input_dims: Vec<usize>,
        size: usize,
    },
    Reshape {
        input_dims: Vec<usize>,
        output_dims: Vec<usize>,
    },
    Residual {
        layers: Vec<LayerSnapshot>,
    },
}

impl LayerSnapshot {
    /// Rebuilds the layer, validating its dimensions along the way.
    pub fn into_layer(self) -> Result<Layer> {
        let layer = match self {
            LayerSnapshot::Dense { weights, biases } => {
                Layer::Dense(Dense::from_parameters(weights.to_array()?, biases.to_array()?)?)
            }
            LayerSnapshot::Activation { dims, act_fn } => {
                Layer::Activation(Activation::new(dims, act_fn))
            }
            LayerSnapshot::Dropout { dims, keep_prob } => {
                Layer::Dropout(Dropout::new(dims, keep_prob)?)
            }
            LayerSnapshot::LayerNorm { gamma, beta } => {
                Layer::LayerNorm(LayerNorm::from_parameters(gamma.to_array()?, beta.to_array()?)?)
            }
            LayerSnapshot::BatchNorm {
                gamma,
                beta,
                running_mean,
                running_var,
                momentum,
            } => Layer::BatchNorm(BatchNorm::from_parameters(
                gamma.to_array()?,
                beta.to_array()?,
                running_mean.to_array()?,
                running_var.to_array()?,
                momentum,
            )?),
            LayerSnapshot::Average { input_dims, axes } => {
                Layer::Average(Average::new(input_dims, axes)?)
            }
            LayerSnapshot::Convolution {
                input_dims,
                kernels,
                biases,
            } => Layer::Convolution(Convolution::from_parameters(
                &input_dims,
                kernels.to_array()?,
                biases.to_array()?,
            )?),
            LayerSnapshot::MaxPool { input_dims, size } => {
                Layer::MaxPool(MaxPool::new(&input_dims, size)?)
            }
            LayerSnapshot::Reshape {
                input_dims,
                output_dims,
            } => Layer::Reshape(Reshape::new(input_dims, output_dims)?),
            LayerSnapshot::Residual { layers } => {
                let layers = layers
                    .into_iter()
                    .map(LayerSnapshot::into_layer)
                    .collect::<Result<Vec<_>>>()?;
                Layer::Residual(Residual::new(layers)?)
            }
        };

        Ok(layer)
    }
}

/// A whole model as stored in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub version: u32,
    pub layers: Vec<LayerSnapshot>,
}

impl ModelSnapshot {
    pub fn new(layers: Vec<LayerSnapshot>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            layers,
        }
    }

    pub fn check_version(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(MlErr::InvalidConfig(format!(
                "unsupported model file version {}, expected {SNAPSHOT_VERSION}",
                self.version
            )));
        }

        Ok(())
    }
}
