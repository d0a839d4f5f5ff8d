use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;

const CLIP: f32 = 1e-15;

/// Categorical cross entropy over softmax probabilities and one-hot labels.
///
/// Since it's always paired with a softmax output, `loss_prime` already returns the combined
/// softmax and cross entropy derivative `(p - y) / n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let n = y_pred.nrows().max(1) as f32;
        let total: f32 = y_pred
            .iter()
            .zip(y.iter())
            .map(|(&p, &y)| -y * p.clamp(CLIP, 1. - CLIP).ln())
            .sum();

        total / n
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        (&y_pred - &y) / n
    }
}

/// Row-wise numerically stable softmax.
///
/// # Arguments
/// * `z` - The logits, one row per example.
///
/// # Returns
/// The probabilities, every row sums up to one.
pub fn softmax(z: ArrayView2<f32>) -> Array2<f32> {
    let mut out = z.to_owned();

    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row /= sum;
    }

    out
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn softmax_rows_sum_to_one_and_survive_large_logits() {
        let z = array![[1000., 1001., 1002.], [-5., 0., 5.]];
        let p = softmax(z.view());

        for row in p.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
            assert!(row.iter().all(|x| x.is_finite()));
        }
        assert!(p[[0, 2]] > p[[0, 1]] && p[[0, 1]] > p[[0, 0]]);
    }

    #[test]
    fn uniform_prediction_over_ten_classes_costs_ln_10() {
        let p = Array2::from_elem((4, 10), 0.1);
        let mut y = Array2::zeros((4, 10));
        for i in 0..4 {
            y[[i, i]] = 1.;
        }

        let loss = CrossEntropy.loss(p.view(), y.view());
        assert!((loss - 10f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn zero_probabilities_are_clipped() {
        let p = array![[0., 1.]];
        let y = array![[1., 0.]];

        assert!(CrossEntropy.loss(p.view(), y.view()).is_finite());
    }

    #[test]
    fn loss_prime_is_mean_difference() {
        let p = array![[0.25, 0.75], [0.5, 0.5]];
        let y = array![[0., 1.], [1., 0.]];

        let d = CrossEntropy.loss_prime(p.view(), y.view());
        assert_eq!(d, array![[0.125, -0.125], [-0.25, 0.25]]);
    }
}
