use serde::{Deserialize, Serialize};

use super::{LeakyRelu, Sigmoid};

/// An elementwise activation function.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActFn {
    Relu,
    LeakyRelu(LeakyRelu),
    Tanh,
    Identity,
    Sigmoid(Sigmoid),
}
use ActFn::*;

impl ActFn {
    pub fn leaky_relu(slope: f32) -> Self {
        LeakyRelu(LeakyRelu::new(slope))
    }

    pub fn sigmoid(amp: f32) -> Self {
        Sigmoid(Sigmoid::new(amp))
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            Relu => LeakyRelu::relu().f(x),
            LeakyRelu(a) => a.f(x),
            Tanh => x.tanh(),
            Identity => x,
            Sigmoid(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Relu => LeakyRelu::relu().df(x),
            LeakyRelu(a) => a.df(x),
            Tanh => 1. - x.tanh().powi(2),
            Identity => 1.,
            Sigmoid(a) => a.df(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivatives_match_finite_differences() {
        let fns = [
            Relu,
            ActFn::leaky_relu(0.01),
            Tanh,
            Identity,
            ActFn::sigmoid(1.),
            ActFn::sigmoid(2.5),
        ];
        let h = 1e-3;

        for act_fn in fns {
            for x in [-2.0f32, -0.5, 0.3, 1.7] {
                let numeric = (act_fn.f(x + h) - act_fn.f(x - h)) / (2. * h);
                let analytic = act_fn.df(x);
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "{act_fn:?} at {x}: {numeric} != {analytic}"
                );
            }
        }
    }

    #[test]
    fn relu_clamps_negatives() {
        assert_eq!(Relu.f(-3.), 0.);
        assert_eq!(Relu.f(3.), 3.);
        assert_eq!(Relu.df(-3.), 0.);
        assert!((ActFn::leaky_relu(0.01).f(-3.) + 0.03).abs() < 1e-6);
    }
}
