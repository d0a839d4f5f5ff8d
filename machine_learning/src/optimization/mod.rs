mod adalm;
mod adam;
mod gradient_descent;
mod objective;
mod optimizer;
mod regulariser;

pub use adalm::Adalm;
pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use objective::{BatchObjective, Objective};
pub use optimizer::{Optimizer, OptimizerKind, Step};
pub use regulariser::{Regularised, WeightDecay};
