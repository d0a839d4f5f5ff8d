use std::collections::VecDeque;

/// Standard deviation under which the training loss is considered flat.
const FLAT_STD: f32 = 1e-6;

/// Watches the training loss for runs that stopped learning.
///
/// A run is stalled once the window is full, the loss in it is flat and even its minimum is
/// worse than `-ln(0.1)`, the cross entropy of giving the right class a 10% probability.
#[derive(Debug, Clone)]
pub struct StabilityGuard {
    window: VecDeque<f32>,
    capacity: usize,
}

impl StabilityGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records the training loss of an epoch.
    ///
    /// # Returns
    /// Whether the run is stalled and should be aborted.
    pub fn push(&mut self, loss: f32) -> bool {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(loss);

        self.is_stalled()
    }

    pub fn is_stalled(&self) -> bool {
        if self.window.len() < self.capacity {
            return false;
        }

        let n = self.window.len() as f32;
        let mean = self.window.iter().sum::<f32>() / n;
        let var = self.window.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / n;
        let min = self.window.iter().copied().fold(f32::INFINITY, f32::min);

        var.sqrt() < FLAT_STD && min > -(0.1f32.ln())
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
