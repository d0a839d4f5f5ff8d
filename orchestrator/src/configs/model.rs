use machine_learning::{arch::activations::ActFn, initialization::ParamGen};
use serde::{Deserialize, Serialize};

/// A single layer of an explicitly laid out model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Dense {
        dim: (usize, usize),
        #[serde(default)]
        init: ParamGen,
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
        dims: Vec<usize>,
    },
    BatchNorm {
        dims: Vec<usize>,
    },
    Average {
        input_dims: Vec<usize>,
        axes: Vec<usize>,
    },
    Convolution {
        input_dims: Vec<usize>,
        n_kernels: usize,
        kernel_size: (usize, usize),
        #[serde(default)]
        init: ParamGen,
    },
    MaxPool {
        input_dims: Vec<usize>,
        size: usize,
    },
    Flatten {
        input_dims: Vec<usize>,
    },
    Residual {
        layers: Vec<LayerConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelConfig {
    /// A multilayer perceptron whose normalisation and dropout come from the training
    /// parameters.
    Mlp {
        /// The input size, every hidden size and the amount of classes.
        dims: Vec<usize>,
        act_fn: ActFn,
        #[serde(default)]
        init: ParamGen,
    },
    Sequential {
        layers: Vec<LayerConfig>,
    },
}
