use ndarray::{ArrayView2, ArrayViewD};

use super::Executor;
use crate::{
    Gradient, Result,
    arch::Sequential,
    optimization::{BatchObjective, Objective},
};

/// Runs every pass on the calling thread, directly on the trainer's model.
#[derive(Debug, Default, Clone, Copy)]
pub struct Soloist;

impl Executor for Soloist {
    fn loss(
        &mut self,
        model: &mut Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
    ) -> Result<f32> {
        BatchObjective::new(x, y, seed).loss(model)
    }

    fn loss_and_grad(
        &mut self,
        model: &mut Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
    ) -> Result<(f32, Gradient)> {
        BatchObjective::new(x, y, seed).loss_and_grad(model)
    }
}
