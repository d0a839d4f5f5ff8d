use rand::Rng;

use super::{
    activations::ActFn,
    layers::{Layer, NormalisationType},
};
use crate::{MlErr, Result, initialization::ParamGen};

fn normalisation(kind: NormalisationType, dims: Vec<usize>) -> Result<Option<Layer>> {
    match kind {
        NormalisationType::None => Ok(None),
        NormalisationType::Layer => Layer::layer_norm(dims).map(Some),
        NormalisationType::Batch => Layer::batch_norm(dims).map(Some),
    }
}

/// Resolves the keep probability of every hidden layer.
///
/// No probabilities means no dropout, a single one applies to every hidden layer and otherwise
/// there must be one per hidden layer.
fn keep_probs(dropout_keep_probs: &[f32], hidden: usize) -> Result<Vec<f32>> {
    match dropout_keep_probs {
        [] => Ok(vec![1.; hidden]),
        &[p] => Ok(vec![p; hidden]),
        probs if probs.len() == hidden => Ok(probs.to_vec()),
        probs => Err(MlErr::SizeMismatch {
            what: "dropout keep probabilities",
            got: probs.len(),
            expected: hidden,
        }),
    }
}

/// Builds a multilayer perceptron.
///
/// Every hidden layer is `Dense → [Normalisation] → Activation → [Dropout]`, dropout being skipped
/// when its keep probability is one. The output layer is a plain `Dense` producing the logits.
///
/// # Arguments
/// * `dims` - The input size, every hidden size and the amount of classes.
/// * `act_fn` - The activation of the hidden layers.
/// * `normalisation` - The normalisation applied before each hidden activation.
/// * `dropout_keep_probs` - Either empty, a single value or one value per hidden layer.
/// * `init` - How to draw the initial weights.
/// * `rng` - A random number generator.
pub fn mlp<R: Rng + ?Sized>(
    dims: &[usize],
    act_fn: ActFn,
    normalisation_type: NormalisationType,
    dropout_keep_probs: &[f32],
    init: ParamGen,
    rng: &mut R,
) -> Result<Vec<Layer>> {
    if dims.len() < 2 {
        return Err(MlErr::InvalidConfig(format!(
            "an mlp needs at least an input and an output size, got {dims:?}"
        )));
    }

    let hidden = dims.len() - 2;
    let keep_probs = keep_probs(dropout_keep_probs, hidden)?;
    let mut layers = Vec::new();

    for (pair, keep_prob) in dims.windows(2).zip(keep_probs) {
        let (n, m) = (pair[0], pair[1]);
        layers.push(Layer::dense((n, m), init, rng)?);
        layers.extend(normalisation(normalisation_type, vec![m])?);
        layers.push(Layer::activation(vec![m], act_fn));

        if keep_prob < 1. {
            layers.push(Layer::dropout(vec![m], keep_prob)?);
        }
    }

    if let &[.., n, m] = dims {
        layers.push(Layer::dense((n, m), init, rng)?);
    }

    Ok(layers)
}

/// Builds a `Convolution → Activation → MaxPool` block.
///
/// # Arguments
/// * `input_dims` - The `(channels, height, width)` of each example.
/// * `n_kernels` - The amount of output channels.
/// * `kernel_size` - The `(height, width)` of each kernel.
/// * `pool_size` - The side of the pooling windows.
/// * `act_fn` - The activation between the convolution and the pooling.
/// * `rng` - A random number generator.
pub fn convolution_block<R: Rng + ?Sized>(
    input_dims: &[usize],
    n_kernels: usize,
    kernel_size: (usize, usize),
    pool_size: usize,
    act_fn: ActFn,
    rng: &mut R,
) -> Result<Vec<Layer>> {
    let conv = Layer::convolution(input_dims, n_kernels, kernel_size, ParamGen::Kaiming, rng)?;
    let dims = conv.output_dims().to_vec();
    let pool = Layer::max_pool(&dims, pool_size)?;

    Ok(vec![conv, Layer::activation(dims, act_fn), pool])
}

/// Builds a residual block around `Dense → [Normalisation] → Activation → Dense`.
///
/// # Arguments
/// * `dims` - The size of the block's input and output.
/// * `hidden` - The size of the inner layer.
/// * `act_fn` - The inner activation.
/// * `normalisation_type` - The inner normalisation.
/// * `rng` - A random number generator.
pub fn residual_block<R: Rng + ?Sized>(
    dims: usize,
    hidden: usize,
    act_fn: ActFn,
    normalisation_type: NormalisationType,
    rng: &mut R,
) -> Result<Layer> {
    let mut layers = vec![Layer::dense((dims, hidden), ParamGen::Kaiming, rng)?];
    layers.extend(normalisation(normalisation_type, vec![hidden])?);
    layers.push(Layer::activation(vec![hidden], act_fn));
    layers.push(Layer::dense((hidden, dims), ParamGen::Kaiming, rng)?);

    Layer::residual(layers)
}
