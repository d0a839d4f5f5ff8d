use ndarray::ArrayD;
use ndarray_rand::RandomExt;
use rand_distr::Bernoulli;

use super::Mode;
use crate::{MlErr, Result, arch::snapshot::LayerSnapshot};

#[derive(Debug, Clone)]
enum Cache {
    Identity,
    Mask(ArrayD<f32>),
}

/// Inverted dropout: while training each unit is kept with probability `keep_prob` and scaled by
/// `1 / keep_prob`, in evaluation it is the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    dims: Vec<usize>,
    keep_prob: f32,
    cache: Option<Cache>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `dims` - The dimensions of each example.
    /// * `keep_prob` - The probability of keeping each unit, in `(0, 1]`.
    pub fn new(dims: Vec<usize>, keep_prob: f32) -> Result<Self> {
        if !(keep_prob > 0. && keep_prob <= 1.) {
            return Err(MlErr::InvalidConfig(format!(
                "dropout keep probability must be in (0, 1], got {keep_prob}"
            )));
        }

        Ok(Self {
            dims,
            keep_prob,
            cache: None,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn keep_prob(&self) -> f32 {
        self.keep_prob
    }

    pub fn forward(&mut self, x: ArrayD<f32>, mode: &mut Mode<'_>) -> Result<ArrayD<f32>> {
        let keep_prob = self.keep_prob;

        let rng = match mode {
            Mode::Train(rng) | Mode::Measure(rng) if keep_prob < 1. => rng,
            _ => {
                self.cache = Some(Cache::Identity);
                return Ok(x);
            }
        };

        let distribution = Bernoulli::new(keep_prob as f64)
            .map_err(|e| MlErr::InvalidConfig(format!("dropout: {e}")))?;
        let mask = ArrayD::<bool>::random_using(x.raw_dim(), distribution, &mut **rng)
            .mapv(|keep| if keep { 1. / keep_prob } else { 0. });

        let y = x * &mask;
        self.cache = Some(Cache::Mask(mask));
        Ok(y)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self.cache.take() {
            Some(Cache::Identity) => Ok(d),
            Some(Cache::Mask(mask)) => Ok(d * &mask),
            None => Err(MlErr::EmptyCache { layer: "dropout" }),
        }
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::Dropout {
            dims: self.dims.clone(),
            keep_prob: self.keep_prob,
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::layers::testing::random_input;

    #[test]
    fn evaluation_is_the_identity() {
        let mut layer = Dropout::new(vec![10], 0.5).unwrap();
        let x = random_input(8, &[10], 1);

        let y = layer.forward(x.clone(), &mut Mode::Eval).unwrap();
        assert_eq!(y, x);

        let d = random_input(8, &[10], 2);
        assert_eq!(layer.backward(d.clone()).unwrap(), d);
    }

    #[test]
    fn training_replays_the_mask_in_backward() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut layer = Dropout::new(vec![50], 0.5).unwrap();
        let x = ArrayD::ones(vec![4, 50]);

        let y = layer.forward(x, &mut Mode::Train(&mut rng)).unwrap();
        let d = layer.backward(ArrayD::ones(vec![4, 50])).unwrap();

        assert_eq!(y, d);
        assert!(y.iter().all(|&v| v == 0. || v == 2.));
        assert!(y.iter().any(|&v| v == 0.));
        assert!(y.iter().any(|&v| v == 2.));
    }

    #[test]
    fn fresh_mask_per_call() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut layer = Dropout::new(vec![50], 0.5).unwrap();

        let a = layer
            .forward(ArrayD::ones(vec![4, 50]), &mut Mode::Train(&mut rng))
            .unwrap();
        let b = layer
            .forward(ArrayD::ones(vec![4, 50]), &mut Mode::Train(&mut rng))
            .unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn invalid_keep_probability() {
        assert!(Dropout::new(vec![1], 0.).is_err());
        assert!(Dropout::new(vec![1], 1.5).is_err());
        assert!(Dropout::new(vec![1], 1.).is_ok());
    }
}
