use std::ops::{Div, Mul, Neg};

use ndarray::{ArrayD, Zip};
use rayon::prelude::*;

use crate::{MlErr, Result};

/// A model's gradient has exactly the same layout as its parameters.
pub type Gradient = Params;

/// An ordered list of tensors mirroring the learnable quantities of a model, in forward order.
///
/// It is used both for the parameters themselves (snapshots, rollbacks) and for anything shaped
/// like them: gradients, updates and optimizer moments. Elementwise operations run in parallel
/// over the tensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    tensors: Vec<ArrayD<f32>>,
}

impl Params {
    /// Creates a new `Params`.
    ///
    /// # Arguments
    /// * `tensors` - The tensors, in the model's forward order.
    pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    /// Returns a `Params` with the same layout as this one but filled with zeros.
    pub fn zeros_like(&self) -> Self {
        let tensors = self
            .tensors
            .iter()
            .map(|t| ArrayD::zeros(t.raw_dim()))
            .collect();

        Self { tensors }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// The total amount of scalars held.
    pub fn size(&self) -> usize {
        self.tensors.iter().map(|t| t.len()).sum()
    }

    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    pub fn tensors_mut(&mut self) -> &mut [ArrayD<f32>] {
        &mut self.tensors
    }

    pub fn into_tensors(self) -> Vec<ArrayD<f32>> {
        self.tensors
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArrayD<f32>> {
        self.tensors.iter()
    }

    /// Checks that `other` has exactly this layout.
    ///
    /// # Arguments
    /// * `other` - The params to compare against.
    ///
    /// # Returns
    /// A size or shape mismatch error naming the first difference found.
    pub fn check_layout(&self, other: &Params) -> Result<()> {
        if self.len() != other.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameter tensors",
                got: other.len(),
                expected: self.len(),
            });
        }

        for (a, b) in self.tensors.iter().zip(&other.tensors) {
            if a.shape() != b.shape() {
                return Err(MlErr::ShapeMismatch {
                    what: "parameter tensor",
                    got: b.shape().to_vec(),
                    expected: a.shape().to_vec(),
                });
            }
        }

        Ok(())
    }

    /// Applies `f` elementwise to every scalar.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let tensors = self.tensors.par_iter().map(|t| t.mapv(&f)).collect();
        Self { tensors }
    }

    /// Combines this and `other` elementwise with `f`.
    ///
    /// # Arguments
    /// * `other` - Params with the same layout as `self`.
    /// * `f` - The combining function, receives `(self, other)` scalars.
    ///
    /// # Returns
    /// The combined params or a layout mismatch error.
    pub fn zip_map<F>(&self, other: &Params, f: F) -> Result<Self>
    where
        F: Fn(f32, f32) -> f32 + Sync + Send,
    {
        self.check_layout(other)?;

        let tensors = self
            .tensors
            .par_iter()
            .zip(other.tensors.par_iter())
            .map(|(a, b)| Zip::from(a).and(b).map_collect(|&a, &b| f(a, b)))
            .collect();

        Ok(Self { tensors })
    }

    pub fn try_add(&self, other: &Params) -> Result<Self> {
        self.zip_map(other, |a, b| a + b)
    }

    pub fn try_sub(&self, other: &Params) -> Result<Self> {
        self.zip_map(other, |a, b| a - b)
    }

    /// Adds `alpha * other` in place.
    pub fn scaled_add(&mut self, alpha: f32, other: &Params) -> Result<()> {
        self.check_layout(other)?;

        self.tensors
            .par_iter_mut()
            .zip(other.tensors.par_iter())
            .for_each(|(a, b)| a.scaled_add(alpha, b));

        Ok(())
    }

    pub fn powi(&self, n: i32) -> Self {
        self.map(|x| x.powi(n))
    }

    pub fn powf(&self, n: f32) -> Self {
        self.map(|x| x.powf(n))
    }

    pub fn sqrt(&self) -> Self {
        self.map(f32::sqrt)
    }

    /// The euclidean norm of each tensor.
    pub fn norms(&self) -> Vec<f32> {
        self.tensors
            .par_iter()
            .map(|t| t.iter().map(|x| x * x).sum::<f32>().sqrt())
            .collect()
    }

    /// The euclidean norm of all scalars taken together.
    pub fn global_norm(&self) -> f32 {
        self.norms().iter().map(|n| n * n).sum::<f32>().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.tensors
            .par_iter()
            .all(|t| t.iter().all(|x| x.is_finite()))
    }
}

impl Neg for Params {
    type Output = Params;

    fn neg(self) -> Self::Output {
        self * -1.
    }
}

impl Neg for &Params {
    type Output = Params;

    fn neg(self) -> Self::Output {
        self * -1.
    }
}

impl Mul<f32> for Params {
    type Output = Params;

    fn mul(mut self, rhs: f32) -> Self::Output {
        self.tensors.par_iter_mut().for_each(|t| *t *= rhs);
        self
    }
}

impl Mul<f32> for &Params {
    type Output = Params;

    fn mul(self, rhs: f32) -> Self::Output {
        self.map(|x| x * rhs)
    }
}

impl Div<f32> for Params {
    type Output = Params;

    fn div(mut self, rhs: f32) -> Self::Output {
        self.tensors.par_iter_mut().for_each(|t| *t /= rhs);
        self
    }
}

impl Div<f32> for &Params {
    type Output = Params;

    fn div(self, rhs: f32) -> Self::Output {
        self.map(|x| x / rhs)
    }
}

impl FromIterator<ArrayD<f32>> for Params {
    fn from_iter<I: IntoIterator<Item = ArrayD<f32>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn params(seed: f32) -> Params {
        let a = ArrayD::from_shape_fn(IxDyn(&[2, 3]), |i| seed + (i[0] * 3 + i[1]) as f32 * 0.25);
        let b = ArrayD::from_shape_fn(IxDyn(&[3]), |i| seed - i[0] as f32);
        Params::new(vec![a, b])
    }

    fn assert_close(a: &Params, b: &Params) {
        a.check_layout(b).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            for (x, y) in x.iter().zip(y.iter()) {
                assert!((x - y).abs() < 1e-5, "{x} != {y}");
            }
        }
    }

    #[test]
    fn add_then_sub_is_identity() {
        let a = params(1.5);
        let b = params(-0.75);

        let back = a.try_add(&b).unwrap().try_sub(&b).unwrap();
        assert_close(&back, &a);
    }

    #[test]
    fn scaling_by_two_is_adding_to_itself() {
        let a = params(0.3);
        assert_close(&(&a * 2.), &a.try_add(&a).unwrap());
    }

    #[test]
    fn neg_and_div() {
        let a = params(2.);
        assert_close(&(-&a), &(&a * -1.));
        assert_close(&(&a / 2.), &(&a * 0.5));
    }

    #[test]
    fn powers_and_sqrt() {
        let a = params(2.).map(f32::abs);
        assert_close(&a.powi(2).sqrt(), &a);
        assert_close(&a.powf(0.5), &a.sqrt());
    }

    #[test]
    fn norm_of_known_values() {
        let p = Params::new(vec![
            ArrayD::from_shape_vec(IxDyn(&[2]), vec![3., 4.]).unwrap(),
            ArrayD::from_shape_vec(IxDyn(&[1]), vec![12.]).unwrap(),
        ]);

        assert_eq!(p.norms(), vec![5., 12.]);
        assert_eq!(p.global_norm(), 13.);
    }

    #[test]
    fn mismatched_layouts_fail() {
        let a = params(1.);
        let shorter = Params::new(vec![a.tensors()[0].clone()]);
        let reshaped = Params::new(vec![
            ArrayD::zeros(IxDyn(&[3, 2])),
            a.tensors()[1].clone(),
        ]);

        assert!(matches!(
            a.try_add(&shorter),
            Err(MlErr::SizeMismatch { .. })
        ));
        assert!(matches!(
            a.try_sub(&reshaped),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn scaled_add_in_place() {
        let mut a = params(1.);
        let b = params(2.);
        let expected = a.try_add(&(&b * 0.5)).unwrap();

        a.scaled_add(0.5, &b).unwrap();
        assert_close(&a, &expected);
    }

    #[test]
    fn finiteness() {
        let mut a = params(1.);
        assert!(a.is_finite());

        if let Some(x) = a.tensors_mut()[1].iter_mut().next() {
            *x = f32::NAN;
        }
        assert!(!a.is_finite());
    }
}
