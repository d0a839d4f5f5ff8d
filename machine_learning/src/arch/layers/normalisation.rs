use ndarray::{ArrayViewD, ArrayViewMutD, Ix2, prelude::*};
use serde::{Deserialize, Serialize};

use super::Mode;
use crate::{
    MlErr, Result,
    arch::snapshot::{LayerSnapshot, TensorSnapshot},
};

const EPSILON: f32 = 1e-5;
const DEFAULT_MOMENTUM: f32 = 0.9;

/// Which normalisation layer, if any, goes after each hidden dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalisationType {
    #[default]
    None,
    Layer,
    Batch,
}

#[derive(Debug, Clone)]
struct Cache {
    x_hat: Array2<f32>,
    inv_std: Array2<f32>,
    /// Whether the statistics came from the batch itself, in which case they depend on `x`.
    batch_stats: bool,
}

/// Normalises `x` along `axis`, keeping the reduced axis for broadcasting.
fn normalise(x: &Array2<f32>, axis: Axis) -> Result<(Array2<f32>, Array2<f32>)> {
    let mean = x
        .mean_axis(axis)
        .ok_or_else(|| MlErr::InvalidConfig("can't normalise an empty axis".into()))?
        .insert_axis(axis);
    let inv_std = x
        .var_axis(axis, 0.)
        .mapv(|v| 1. / (v + EPSILON).sqrt())
        .insert_axis(axis);

    let x_hat = (x - &mean) * &inv_std;
    Ok((x_hat, inv_std))
}

/// Backpropagates through `y = gamma * x_hat + beta`.
///
/// # Returns
/// A tuple with the input gradient, the gamma gradient and the beta gradient.
fn normalise_backward(
    d: &Array2<f32>,
    cache: &Cache,
    gamma: &Array1<f32>,
    axis: Axis,
) -> (Array2<f32>, Array1<f32>, Array1<f32>) {
    let Cache {
        x_hat,
        inv_std,
        batch_stats,
    } = cache;

    let dgamma = (d * x_hat).sum_axis(Axis(0));
    let dbeta = d.sum_axis(Axis(0));
    let dx_hat = d * gamma;

    if !batch_stats {
        return (dx_hat * inv_std, dgamma, dbeta);
    }

    let n = d.len_of(axis) as f32;
    let sum = dx_hat.sum_axis(axis).insert_axis(axis);
    let dot = (&dx_hat * x_hat).sum_axis(axis).insert_axis(axis);
    let dx = (dx_hat * n - &sum - &(x_hat * &dot)) * &(inv_std / n);

    (dx, dgamma, dbeta)
}

fn check_features(layer: &'static str, dims: &[usize]) -> Result<usize> {
    match dims {
        &[n] if n > 0 => Ok(n),
        _ => Err(MlErr::DimensionMismatch {
            layer,
            got: dims.to_vec(),
            expected: vec![dims.iter().product()],
        }),
    }
}

/// Normalises every example over its features.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    dims: Vec<usize>,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    cache: Option<Cache>,
    grad: Option<(Array1<f32>, Array1<f32>)>,
}

impl LayerNorm {
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        let n = check_features("layer norm", &dims)?;
        Self::from_parameters(Array1::ones(n), Array1::zeros(n))
    }

    pub fn from_parameters(gamma: Array1<f32>, beta: Array1<f32>) -> Result<Self> {
        if gamma.len() != beta.len() {
            return Err(MlErr::SizeMismatch {
                what: "layer norm beta",
                got: beta.len(),
                expected: gamma.len(),
            });
        }
        check_features("layer norm", &[gamma.len()])?;

        Ok(Self {
            dims: vec![gamma.len()],
            gamma,
            beta,
            cache: None,
            grad: None,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;
        let (x_hat, inv_std) = normalise(&x, Axis(1))?;
        let y = &x_hat * &self.gamma + &self.beta;

        self.cache = Some(Cache {
            x_hat,
            inv_std,
            batch_stats: true,
        });
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let cache = self
            .cache
            .take()
            .ok_or(MlErr::EmptyCache { layer: "layer norm" })?;
        let d = d.into_dimensionality::<Ix2>()?;

        let (dx, dgamma, dbeta) = normalise_backward(&d, &cache, &self.gamma, Axis(1));
        self.grad = Some((dgamma, dbeta));
        Ok(dx.into_dyn())
    }

    pub fn take_grad(&mut self) -> Result<Vec<ArrayD<f32>>> {
        let (dgamma, dbeta) = self
            .grad
            .take()
            .ok_or(MlErr::MissingGradient { layer: "layer norm" })?;

        Ok(vec![dgamma.into_dyn(), dbeta.into_dyn()])
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.gamma.view().into_dyn(), self.beta.view().into_dyn()]
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.gamma.view_mut().into_dyn(),
            self.beta.view_mut().into_dyn(),
        ]
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::LayerNorm {
            gamma: TensorSnapshot::from_array(&self.gamma),
            beta: TensorSnapshot::from_array(&self.beta),
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
        self.grad = None;
    }
}

/// Normalises every feature over the batch, keeping running statistics for evaluation.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    dims: Vec<usize>,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    momentum: f32,
    cache: Option<Cache>,
    grad: Option<(Array1<f32>, Array1<f32>)>,
}

impl BatchNorm {
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        let n = check_features("batch norm", &dims)?;

        Ok(Self {
            dims,
            gamma: Array1::ones(n),
            beta: Array1::zeros(n),
            running_mean: Array1::zeros(n),
            running_var: Array1::ones(n),
            momentum: DEFAULT_MOMENTUM,
            cache: None,
            grad: None,
        })
    }

    /// Creates a new `BatchNorm` from existing parameters and running statistics.
    ///
    /// # Arguments
    /// * `gamma`, `beta` - The learned scale and shift.
    /// * `running_mean`, `running_var` - The statistics used in evaluation mode.
    /// * `momentum` - How much of the running statistics survives each training batch.
    pub fn from_parameters(
        gamma: Array1<f32>,
        beta: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
        momentum: f32,
    ) -> Result<Self> {
        let n = gamma.len();
        for (what, t) in [
            ("batch norm beta", &beta),
            ("batch norm running mean", &running_mean),
            ("batch norm running variance", &running_var),
        ] {
            if t.len() != n {
                return Err(MlErr::SizeMismatch {
                    what,
                    got: t.len(),
                    expected: n,
                });
            }
        }
        if !(0. ..=1.).contains(&momentum) {
            return Err(MlErr::InvalidConfig(format!(
                "batch norm momentum must be in [0, 1], got {momentum}"
            )));
        }

        let mut layer = Self::new(vec![n])?;
        layer.gamma = gamma;
        layer.beta = beta;
        layer.running_mean = running_mean;
        layer.running_var = running_var;
        layer.momentum = momentum;
        Ok(layer)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn running_mean(&self) -> ArrayView1<'_, f32> {
        self.running_mean.view()
    }

    pub fn running_var(&self) -> ArrayView1<'_, f32> {
        self.running_var.view()
    }

    pub fn forward(&mut self, x: ArrayD<f32>, mode: &Mode<'_>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;

        let cache = if mode.is_training() {
            let m = self.momentum;
            let mean = x
                .mean_axis(Axis(0))
                .ok_or_else(|| MlErr::InvalidConfig("can't normalise an empty batch".into()))?;
            let var = x.var_axis(Axis(0), 0.);

            if mode.updates_statistics() {
                self.running_mean = &self.running_mean * m + mean * (1. - m);
                self.running_var = &self.running_var * m + var * (1. - m);
            }

            let (x_hat, inv_std) = normalise(&x, Axis(0))?;
            Cache {
                x_hat,
                inv_std,
                batch_stats: true,
            }
        } else {
            let inv_std = self
                .running_var
                .mapv(|v| 1. / (v + EPSILON).sqrt())
                .insert_axis(Axis(0));
            let x_hat = (&x - &self.running_mean) * &inv_std;

            Cache {
                x_hat,
                inv_std,
                batch_stats: false,
            }
        };

        let y = &cache.x_hat * &self.gamma + &self.beta;
        self.cache = Some(cache);
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let cache = self
            .cache
            .take()
            .ok_or(MlErr::EmptyCache { layer: "batch norm" })?;
        let d = d.into_dimensionality::<Ix2>()?;

        let (dx, dgamma, dbeta) = normalise_backward(&d, &cache, &self.gamma, Axis(0));
        self.grad = Some((dgamma, dbeta));
        Ok(dx.into_dyn())
    }

    pub fn take_grad(&mut self) -> Result<Vec<ArrayD<f32>>> {
        let (dgamma, dbeta) = self
            .grad
            .take()
            .ok_or(MlErr::MissingGradient { layer: "batch norm" })?;

        Ok(vec![dgamma.into_dyn(), dbeta.into_dyn()])
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.gamma.view().into_dyn(), self.beta.view().into_dyn()]
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.gamma.view_mut().into_dyn(),
            self.beta.view_mut().into_dyn(),
        ]
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::BatchNorm {
            gamma: TensorSnapshot::from_array(&self.gamma),
            beta: TensorSnapshot::from_array(&self.beta),
            running_mean: TensorSnapshot::from_array(&self.running_mean),
            running_var: TensorSnapshot::from_array(&self.running_var),
            momentum: self.momentum,
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
        self.grad = None;
    }
}
