use ndarray::{Ix4, prelude::*, s};

use crate::{MlErr, Result, arch::snapshot::LayerSnapshot};

/// Max pooling over non-overlapping `size × size` windows of `(channels, height, width)`
/// examples. The gradient is routed to the maximum of each window.
#[derive(Debug, Clone)]
pub struct MaxPool {
    input_dims: Vec<usize>,
    output_dims: Vec<usize>,
    size: usize,
    /// Ones at the position of each window's maximum.
    mask: Option<Array4<f32>>,
}

impl MaxPool {
    pub fn new(input_dims: &[usize], size: usize) -> Result<Self> {
        let &[c, h, w] = input_dims else {
            return Err(MlErr::DimensionMismatch {
                layer: "max pool",
                got: input_dims.to_vec(),
                expected: vec![1, input_dims.iter().product(), 1],
            });
        };

        if size == 0 || h % size != 0 || w % size != 0 {
            return Err(MlErr::InvalidConfig(format!(
                "max pool of size {size} doesn't tile {input_dims:?}"
            )));
        }

        Ok(Self {
            input_dims: input_dims.to_vec(),
            output_dims: vec![c, h / size, w / size],
            size,
            mask: None,
        })
    }

    pub fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    pub fn output_dims(&self) -> &[usize] {
        &self.output_dims
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (n, c, _, _) = x.dim();
        let (oh, ow) = (self.output_dims[1], self.output_dims[2]);
        let k = self.size;

        let mut y = Array4::zeros((n, c, oh, ow));
        let mut mask = Array4::zeros(x.raw_dim());

        for ((b, ch, oy, ox), out) in y.indexed_iter_mut() {
            let window = x.slice(s![b, ch, oy * k..(oy + 1) * k, ox * k..(ox + 1) * k]);

            let mut best = (0, 0, f32::NEG_INFINITY);
            for ((dy, dx), &v) in window.indexed_iter() {
                if v > best.2 {
                    best = (dy, dx, v);
                }
            }

            *out = best.2;
            mask[[b, ch, oy * k + best.0, ox * k + best.1]] = 1.;
        }

        self.mask = Some(mask);
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mask = self
            .mask
            .take()
            .ok_or(MlErr::EmptyCache { layer: "max pool" })?;
        let d = d.into_dimensionality::<Ix4>()?;
        let k = self.size;

        let mut dx = mask;
        for ((b, ch, oy, ox), &g) in d.indexed_iter() {
            dx.slice_mut(s![b, ch, oy * k..(oy + 1) * k, ox * k..(ox + 1) * k])
                .mapv_inplace(|m| m * g);
        }

        Ok(dx.into_dyn())
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::MaxPool {
            input_dims: self.input_dims.clone(),
            size: self.size,
        }
    }

    pub fn clear_cache(&mut self) {
        self.mask = None;
    }
}
