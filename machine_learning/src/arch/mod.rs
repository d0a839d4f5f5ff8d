pub mod activations;
pub mod blocks;
pub mod layers;
pub mod loss;
mod sequential;
pub mod snapshot;

pub use sequential::Sequential;
