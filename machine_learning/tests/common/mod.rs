#![allow(dead_code)]

use machine_learning::{
    arch::{Sequential, activations::ActFn, blocks, layers::{Layer, NormalisationType}},
    dataset::{Dataset, one_hot},
    initialization::ParamGen,
    training::TrainingParameters,
};
use ndarray::{Array2, Axis};
use ndarray_rand::RandomExt;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Uniform;

pub const FEATURES: usize = 8;
pub const CLASSES: usize = 10;

/// Examples labelled by the argmax of a fixed random linear map, which a small mlp can learn.
pub fn dataset(n: usize, seed: u64) -> Dataset {
    let mut map_rng = StdRng::seed_from_u64(1234);
    let w = Array2::random_using(
        (FEATURES, CLASSES),
        Uniform::new(-1., 1.).unwrap(),
        &mut map_rng,
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let x: Array2<f32> = Array2::random_using((n, FEATURES), Uniform::new(-1., 1.).unwrap(), &mut rng);

    let labels: Vec<usize> = x
        .dot(&w)
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect();

    Dataset::new(x.into_dyn(), one_hot(&labels, CLASSES).unwrap()).unwrap()
}

/// input → 10 ReLU → 10
pub fn mlp(seed: u64) -> Sequential {
    let mut rng = StdRng::seed_from_u64(seed);
    let layers = blocks::mlp(
        &[FEATURES, 10, CLASSES],
        ActFn::Relu,
        NormalisationType::None,
        &[],
        ParamGen::Kaiming,
        &mut rng,
    )
    .unwrap();

    Sequential::new(layers).unwrap()
}

/// A model whose logits start at zero and never move with a zero learning rate.
pub fn flat_model(classes: usize) -> Sequential {
    let mut rng = StdRng::seed_from_u64(0);
    Sequential::new([
        Layer::dense((FEATURES, 10), ParamGen::Kaiming, &mut rng).unwrap(),
        Layer::activation(vec![10], ActFn::Relu),
        Layer::dense((10, classes), ParamGen::Const { value: 0. }, &mut rng).unwrap(),
    ])
    .unwrap()
}

pub fn params(num_epochs: usize) -> TrainingParameters {
    TrainingParameters {
        batch_size: 32,
        learning_rate: 0.1,
        num_epochs,
        seed: 7,
        ..Default::default()
    }
}

pub fn assert_close(a: &Sequential, b: &Sequential, tol: f32) {
    for (a, b) in a.parameters().iter().zip(b.parameters().iter()) {
        assert_eq!(a.shape(), b.shape());
        for (a, b) in a.iter().zip(b.iter()) {
            assert!((a - b).abs() <= tol, "{a} != {b}");
        }
    }
}

/// Routes the engine's logs to the test output, `RUST_LOG` picks the level.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
