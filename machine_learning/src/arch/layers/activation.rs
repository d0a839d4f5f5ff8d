use ndarray::ArrayD;

use crate::{
    MlErr, Result,
    arch::{activations::ActFn, snapshot::LayerSnapshot},
};

/// Applies an `ActFn` elementwise, the derivative is evaluated at the cached pre-activation.
#[derive(Debug, Clone)]
pub struct Activation {
    dims: Vec<usize>,
    act_fn: ActFn,
    z: Option<ArrayD<f32>>,
}

impl Activation {
    pub fn new(dims: Vec<usize>, act_fn: ActFn) -> Self {
        Self {
            dims,
            act_fn,
            z: None,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn act_fn(&self) -> ActFn {
        self.act_fn
    }

    pub fn forward(&mut self, z: ArrayD<f32>) -> ArrayD<f32> {
        let act_fn = self.act_fn;
        self.z = Some(z.clone());
        z.mapv_into(|z| act_fn.f(z))
    }

    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let z = self
            .z
            .take()
            .ok_or(MlErr::EmptyCache { layer: "activation" })?;

        let act_fn = self.act_fn;
        d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        Ok(d)
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Activation {
            dims: self.dims.clone(),
            act_fn: self.act_fn,
        }
    }

    pub fn clear_cache(&mut self) {
        self.z = None;
    }
}
