mod activation;
mod average;
mod convolution;
mod dense;
mod dropout;
mod layer;
mod normalisation;
mod pooling;
mod reshape;
mod residual;

use ndarray::{ArrayBase, Data, Dimension};
use rand::rngs::StdRng;

pub use activation::Activation;
pub use average::Average;
pub use convolution::Convolution;
pub use dense::Dense;
pub use dropout::Dropout;
pub use layer::Layer;
pub use normalisation::{BatchNorm, LayerNorm, NormalisationType};
pub use pooling::MaxPool;
pub use reshape::Reshape;
pub use residual::Residual;

/// Whether a forward pass is part of training or just an evaluation.
///
/// Stochastic layers draw from the training rng and layers with running statistics update them;
/// in `Eval` every layer is deterministic.
pub enum Mode<'r> {
    Train(&'r mut StdRng),
    /// A training pass that only measures the loss, e.g. again after an update. It behaves like
    /// `Train` but running statistics are left as they are.
    Measure(&'r mut StdRng),
    Eval,
}

impl Mode<'_> {
    pub fn is_training(&self) -> bool {
        matches!(self, Mode::Train(_) | Mode::Measure(_))
    }

    pub fn updates_statistics(&self) -> bool {
        matches!(self, Mode::Train(_))
    }
}

pub(crate) fn all_finite<S, D>(a: &ArrayBase<S, D>) -> bool
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    a.iter().all(|x| x.is_finite())
}

#[cfg(test)]
pub(crate) mod testing {
    use ndarray::{ArrayD, IxDyn};
    use ndarray_rand::RandomExt;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::Uniform;

    use super::{Layer, Mode};

    pub fn random_input(batch: usize, dims: &[usize], seed: u64) -> ArrayD<f32> {
        let mut shape = vec![batch];
        shape.extend_from_slice(dims);

        let mut rng = StdRng::seed_from_u64(seed);
        ArrayD::random_using(IxDyn(&shape), Uniform::new(-1., 1.).unwrap(), &mut rng)
    }

    /// Forwards with a freshly seeded rng so that every call sees the same randomness.
    pub fn forward(layer: &mut Layer, x: ArrayD<f32>, train: bool) -> ArrayD<f32> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut mode = if train { Mode::Train(&mut rng) } else { Mode::Eval };
        layer.forward(x, &mut mode).unwrap()
    }

    /// Loss used for gradient checks: a fixed random projection of the layer's output.
    fn projected_loss(layer: &mut Layer, x: &ArrayD<f32>, w: &ArrayD<f32>, train: bool) -> f32 {
        (&forward(layer, x.clone(), train) * w).sum()
    }

    fn nudge(layer: &mut Layer, tensor: usize, i: usize, value: f32) {
        let mut params = layer.parameters_mut();
        params[tensor].as_slice_mut().unwrap()[i] = value;
    }

    /// Checks the analytic input and parameter gradients of `layer` against central finite
    /// differences.
    pub fn check_gradients(mut layer: Layer, x: ArrayD<f32>, train: bool, tol: f32) {
        let y = forward(&mut layer, x.clone(), train);
        let w = random_input(y.shape()[0], &y.shape()[1..], 99);

        let dx = layer.backward(w.clone()).unwrap();
        let grads = layer.take_grad().unwrap();
        assert_eq!(dx.shape(), x.shape());

        let h = 1e-2;
        let dx = dx.as_standard_layout().to_owned();
        let mut x_nudged = x.clone();
        for i in 0..x.len() {
            let orig = x_nudged.as_slice().unwrap()[i];
            x_nudged.as_slice_mut().unwrap()[i] = orig + h;
            let plus = projected_loss(&mut layer, &x_nudged, &w, train);
            x_nudged.as_slice_mut().unwrap()[i] = orig - h;
            let minus = projected_loss(&mut layer, &x_nudged, &w, train);
            x_nudged.as_slice_mut().unwrap()[i] = orig;

            let numeric = (plus - minus) / (2. * h);
            let analytic = dx.as_slice().unwrap()[i];
            assert!(
                (numeric - analytic).abs() < tol,
                "input {i}: numeric {numeric} analytic {analytic}"
            );
        }

        for (t, grad) in grads.iter().enumerate() {
            let grad = grad.as_standard_layout().to_owned();
            for i in 0..grad.len() {
                let orig = layer.parameters()[t].as_slice().unwrap()[i];
                nudge(&mut layer, t, i, orig + h);
                let plus = projected_loss(&mut layer, &x, &w, train);
                nudge(&mut layer, t, i, orig - h);
                let minus = projected_loss(&mut layer, &x, &w, train);
                nudge(&mut layer, t, i, orig);

                let numeric = (plus - minus) / (2. * h);
                let analytic = grad.as_slice().unwrap()[i];
                assert!(
                    (numeric - analytic).abs() < tol,
                    "param {t}[{i}]: numeric {numeric} analytic {analytic}"
                );
            }
        }
    }

    /// Runs a forward and backward pass and checks that the input gradient keeps the input's
    /// shape.
    pub fn check_shapes(mut layer: Layer, batch: usize, train: bool) {
        let x = random_input(batch, &layer.input_dims().to_vec(), 5);
        let y = forward(&mut layer, x.clone(), train);

        let mut expected = vec![batch];
        expected.extend_from_slice(layer.output_dims());
        assert_eq!(y.shape(), expected.as_slice());

        let dx = layer.backward(ArrayD::ones(y.raw_dim())).unwrap();
        assert_eq!(dx.shape(), x.shape());
    }
}
