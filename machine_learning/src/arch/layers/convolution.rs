use ndarray::{ArrayViewD, ArrayViewMutD, Ix4, Zip, prelude::*, s};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::snapshot::{LayerSnapshot, TensorSnapshot},
    initialization::ParamGen,
};

/// A 2D convolution over `(channels, height, width)` examples with stride 1 and no padding.
///
/// Kernels have shape `(out_channels, in_channels, kernel_height, kernel_width)` and there's one
/// bias per output channel.
#[derive(Debug, Clone)]
pub struct Convolution {
    input_dims: Vec<usize>,
    output_dims: Vec<usize>,
    kernels: Array4<f32>,
    biases: Array1<f32>,

    x: Option<Array4<f32>>,
    grad: Option<(Array4<f32>, Array1<f32>)>,
}

impl Convolution {
    /// Creates a new `Convolution` layer.
    ///
    /// # Arguments
    /// * `input_dims` - The `(channels, height, width)` of each example.
    /// * `n_kernels` - The amount of output channels.
    /// * `kernel_size` - The `(height, width)` of each kernel.
    /// * `init` - How to draw the initial kernels.
    /// * `rng` - A random number generator.
    pub fn new<R: Rng + ?Sized>(
        input_dims: &[usize],
        n_kernels: usize,
        kernel_size: (usize, usize),
        init: ParamGen,
        rng: &mut R,
    ) -> Result<Self> {
        let &[c, _, _] = input_dims else {
            return Err(MlErr::DimensionMismatch {
                layer: "convolution",
                got: input_dims.to_vec(),
                expected: vec![1, input_dims.iter().product(), 1],
            });
        };

        let (kh, kw) = kernel_size;
        let fan_in = c * kh * kw;
        let fan_out = n_kernels * kh * kw;
        let kernels = init
            .generate(&[n_kernels, c, kh, kw], fan_in, fan_out, rng)?
            .into_dimensionality::<Ix4>()?;

        Self::from_parameters(input_dims, kernels, Array1::zeros(n_kernels))
    }

    /// Creates a new `Convolution` layer from existing parameters.
    pub fn from_parameters(
        input_dims: &[usize],
        kernels: Array4<f32>,
        biases: Array1<f32>,
    ) -> Result<Self> {
        let (co, ci, kh, kw) = kernels.dim();
        let invalid = |reason: &str| {
            MlErr::InvalidConfig(format!(
                "convolution with kernels {:?} over {input_dims:?}: {reason}",
                kernels.shape()
            ))
        };

        let &[c, h, w] = input_dims else {
            return Err(invalid("examples must be (channels, height, width)"));
        };
        if co == 0 || kh == 0 || kw == 0 {
            return Err(invalid("empty kernels"));
        }
        if ci != c {
            return Err(invalid("channel mismatch"));
        }
        if kh > h || kw > w {
            return Err(invalid("kernel larger than the input"));
        }
        if biases.len() != co {
            return Err(MlErr::SizeMismatch {
                what: "convolution biases",
                got: biases.len(),
                expected: co,
            });
        }

        Ok(Self {
            input_dims: input_dims.to_vec(),
            output_dims: vec![co, h - kh + 1, w - kw + 1],
            kernels,
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

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (co, ci, kh, kw) = self.kernels.dim();
        let (oh, ow) = (self.output_dims[1], self.output_dims[2]);
        let mut z = Array4::zeros((x.len_of(Axis(0)), co, oh, ow));

        for o in 0..co {
            let mut z_o = z.slice_mut(s![.., o, .., ..]);
            z_o.fill(self.biases[o]);

            for i in 0..ci {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let window = x.slice(s![.., i, ky..ky + oh, kx..kx + ow]);
                        z_o.scaled_add(self.kernels[[o, i, ky, kx]], &window);
                    }
                }
            }
        }

        self.x = Some(x);
        Ok(z.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = self
            .x
            .take()
            .ok_or(MlErr::EmptyCache { layer: "convolution" })?;
        let d = d.into_dimensionality::<Ix4>()?;
        let (co, ci, kh, kw) = self.kernels.dim();
        let (oh, ow) = (self.output_dims[1], self.output_dims[2]);

        let mut dk = Array4::zeros(self.kernels.raw_dim());
        let mut dx = Array4::zeros(x.raw_dim());

        for o in 0..co {
            let d_o = d.slice(s![.., o, .., ..]);

            for i in 0..ci {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let window = x.slice(s![.., i, ky..ky + oh, kx..kx + ow]);
                        dk[[o, i, ky, kx]] = Zip::from(&window)
                            .and(&d_o)
                            .fold(0., |acc, &x, &d| acc + x * d);
                        dx.slice_mut(s![.., i, ky..ky + oh, kx..kx + ow])
                            .scaled_add(self.kernels[[o, i, ky, kx]], &d_o);
                    }
                }
            }
        }

        let db = d.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0));
        self.grad = Some((dk, db));
        Ok(dx.into_dyn())
    }

    pub fn take_grad(&mut self) -> Result<Vec<ArrayD<f32>>> {
        let (dk, db) = self
            .grad
            .take()
            .ok_or(MlErr::MissingGradient { layer: "convolution" })?;

        Ok(vec![dk.into_dyn(), db.into_dyn()])
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.kernels.view().into_dyn(), self.biases.view().into_dyn()]
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.kernels.view_mut().into_dyn(),
            self.biases.view_mut().into_dyn(),
        ]
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Convolution {
            input_dims: self.input_dims.clone(),
            kernels: TensorSnapshot::from_array(&self.kernels),
            biases: TensorSnapshot::from_array(&self.biases),
        }
    }

    pub fn clear_cache(&mut self) {
        self.x = None;
        self.grad = None;
    }
}
