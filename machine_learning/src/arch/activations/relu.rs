use serde::{Deserialize, Serialize};

/// Rectified linear unit with a `slope` for negative inputs, a plain ReLU when it's zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeakyRelu {
    slope: f32,
}

impl Default for LeakyRelu {
    fn default() -> Self {
        Self { slope: 0.01 }
    }
}

impl LeakyRelu {
    pub fn new(slope: f32) -> Self {
        Self { slope }
    }

    pub fn relu() -> Self {
        Self { slope: 0. }
    }

    pub fn f(&self, z: f32) -> f32 {
        if z > 0. { z } else { self.slope * z }
    }

    pub fn df(&self, z: f32) -> f32 {
        if z > 0. { 1. } else { self.slope }
    }
}
