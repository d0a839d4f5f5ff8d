use std::sync::{Arc, Mutex};

use crate::{Gradient, Params};

/// Observes the optimization steps of a training run.
///
/// Tracers only look; nothing they do feeds back into training.
pub trait Tracer: Send {
    /// Called after every optimizer step with its gradient and the update that was applied.
    fn on_step(&mut self, epoch: usize, gradient: &Gradient, update: &Params);
}

/// The norms of a single step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepNorms {
    pub epoch: usize,
    pub gradient: f32,
    pub update: f32,
}

/// Records the global gradient and update norms of every step.
#[derive(Debug, Default, Clone)]
pub struct NormTracer {
    steps: Vec<StepNorms>,
}

impl NormTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[StepNorms] {
        &self.steps
    }

    /// The mean gradient norm of every epoch that was traced, in order.
    pub fn mean_gradient_norms(&self) -> Vec<(usize, f32)> {
        let mut means: Vec<(usize, f32, usize)> = Vec::new();

        for step in &self.steps {
            match means.last_mut() {
                Some((epoch, sum, n)) if *epoch == step.epoch => {
                    *sum += step.gradient;
                    *n += 1;
                }
                _ => means.push((step.epoch, step.gradient, 1)),
            }
        }

        means
            .into_iter()
            .map(|(epoch, sum, n)| (epoch, sum / n as f32))
            .collect()
    }
}

impl Tracer for NormTracer {
    fn on_step(&mut self, epoch: usize, gradient: &Gradient, update: &Params) {
        self.steps.push(StepNorms {
            epoch,
            gradient: gradient.global_norm(),
            update: update.global_norm(),
        });
    }
}

impl<T: Tracer> Tracer for Arc<Mutex<T>> {
    fn on_step(&mut self, epoch: usize, gradient: &Gradient, update: &Params) {
        if let Ok(mut tracer) = self.lock() {
            tracer.on_step(epoch, gradient, update);
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn filled(value: f32) -> Params {
        Params::new(vec![ArrayD::from_elem(IxDyn(&[2, 2]), value)])
    }

    #[test]
    fn records_global_norms() {
        let mut tracer = NormTracer::new();

        tracer.on_step(0, &filled(1.), &filled(-0.5));

        assert_eq!(
            tracer.steps(),
            [StepNorms {
                epoch: 0,
                gradient: 2.,
                update: 1.,
            }]
        );
    }

    #[test]
    fn averages_per_epoch() {
        let mut tracer = NormTracer::new();

        tracer.on_step(0, &filled(1.), &filled(0.));
        tracer.on_step(0, &filled(2.), &filled(0.));
        tracer.on_step(1, &filled(0.5), &filled(0.));

        assert_eq!(tracer.mean_gradient_norms(), [(0, 3.), (1, 1.)]);
    }
}
