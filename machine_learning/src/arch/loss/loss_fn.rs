use ndarray::{Array2, ArrayView2};

/// A loss measured on the model's output probabilities.
pub trait LossFn {
    /// The mean loss over the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// The derivative of the mean loss with respect to the pre-softmax logits.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
