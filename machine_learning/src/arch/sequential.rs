use std::io::{Read, Write};

use log::debug;
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Ix2};

use super::{
    layers::{Layer, Mode, all_finite},
    loss::{CrossEntropy, LossFn, softmax},
    snapshot::ModelSnapshot,
};
use crate::{Gradient, MlErr, Params, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the gradient of its layers.
///
/// The last layer produces class logits, `forward` turns them into softmax probabilities and the
/// model is always trained with cross entropy over them.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    probs: Option<Array2<f32>>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` or an error if the layers can't be chained or the last one doesn't
    /// output a flat vector of logits.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<Layer> = layers.into_iter().collect();

        let Some(last) = layers.last() else {
            return Err(MlErr::InvalidConfig("a model needs at least one layer".into()));
        };

        for pair in layers.windows(2) {
            if pair[0].output_dims() != pair[1].input_dims() {
                return Err(MlErr::DimensionMismatch {
                    layer: pair[1].name(),
                    got: pair[0].output_dims().to_vec(),
                    expected: pair[1].input_dims().to_vec(),
                });
            }
        }

        if last.output_dims().len() != 1 {
            return Err(MlErr::InvalidConfig(format!(
                "the last layer must output a vector of logits, got dimensions {:?}",
                last.output_dims()
            )));
        }

        Ok(Self {
            layers,
            probs: None,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_dims(&self) -> &[usize] {
        self.layers[0].input_dims()
    }

    /// The amount of classes the model predicts.
    pub fn num_classes(&self) -> usize {
        self.layers[self.layers.len() - 1].output_dims()[0]
    }

    /// Makes a forward pass through every layer and keeps each of their outputs.
    ///
    /// # Arguments
    /// * `x` - A batch of inputs.
    /// * `mode` - Whether this pass is part of training.
    ///
    /// # Returns
    /// The output of every layer in order, the last one being the logits.
    pub fn forward_prop(
        &mut self,
        x: ArrayViewD<'_, f32>,
        mode: &mut Mode<'_>,
    ) -> Result<Vec<ArrayD<f32>>> {
        let mut outputs: Vec<ArrayD<f32>> = Vec::with_capacity(self.layers.len());
        let mut a = x.to_owned();

        for layer in &mut self.layers {
            a = layer.forward(a, mode)?;
            outputs.push(a.clone());
        }

        Ok(outputs)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - A batch of inputs, shaped `(batch, *input_dims)`.
    /// * `mode` - Whether this pass is part of training.
    ///
    /// # Returns
    /// The softmax probabilities for every example.
    pub fn forward(&mut self, x: ArrayViewD<'_, f32>, mode: &mut Mode<'_>) -> Result<Array2<f32>> {
        let mut a = x.to_owned();
        for layer in &mut self.layers {
            a = layer.forward(a, mode)?;
        }

        let probs = softmax(a.into_dimensionality::<Ix2>()?.view());
        self.probs = Some(probs.clone());

        Ok(probs)
    }

    /// Computes the mean cross entropy of the model over a batch.
    ///
    /// # Arguments
    /// * `x` - A batch of inputs.
    /// * `y` - The one-hot labels of the batch.
    /// * `mode` - Whether this pass is part of training.
    ///
    /// # Returns
    /// The loss or a numerical error if it isn't finite.
    pub fn loss(
        &mut self,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        mode: &mut Mode<'_>,
    ) -> Result<f32> {
        let probs = self.forward(x, mode)?;
        check_labels(&probs, y)?;

        let loss = CrossEntropy.loss(probs.view(), y);
        if !loss.is_finite() {
            return Err(MlErr::NonFinite {
                what: "loss",
                layer: None,
            });
        }

        Ok(loss)
    }

    /// Makes a backward pass through the network, consuming the output of the last `forward`.
    ///
    /// # Arguments
    /// * `y` - The one-hot labels of the batch given to the last `forward`.
    ///
    /// # Returns
    /// The gradient of the mean cross entropy with respect to every parameter, in forward order.
    pub fn backward(&mut self, y: ArrayView2<'_, f32>) -> Result<Gradient> {
        let res = self.backprop(y);
        if res.is_err() {
            self.clear_cache();
        }

        res
    }

    fn backprop(&mut self, y: ArrayView2<'_, f32>) -> Result<Gradient> {
        let probs = self
            .probs
            .take()
            .ok_or(MlErr::EmptyCache { layer: "softmax" })?;
        check_labels(&probs, y)?;

        let mut d = CrossEntropy.loss_prime(probs.view(), y).into_dyn();
        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            d = layer.backward(d)?;

            if !all_finite(&d) {
                return Err(MlErr::NonFinite {
                    what: "backward pass",
                    layer: Some(i),
                });
            }
        }

        let mut tensors = Vec::new();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let grads = layer.take_grad()?;

            if !grads.iter().all(|g| all_finite(g)) {
                return Err(MlErr::NonFinite {
                    what: "gradient",
                    layer: Some(i),
                });
            }

            tensors.extend(grads);
        }

        Ok(Params::new(tensors))
    }

    /// Runs a forward and a backward pass over a batch.
    ///
    /// # Returns
    /// The loss before any update together with its gradient.
    pub fn loss_and_grad(
        &mut self,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        mode: &mut Mode<'_>,
    ) -> Result<(f32, Gradient)> {
        let loss = self.loss(x, y, mode)?;
        let grad = self.backward(y)?;

        Ok((loss, grad))
    }

    /// Predicts the class of every example of a batch.
    pub fn predict(&mut self, x: ArrayViewD<'_, f32>) -> Result<Vec<usize>> {
        let probs = self.forward(x, &mut Mode::Eval)?;
        self.clear_cache();

        let classes = probs
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(best, max), (i, &p)| {
                        if p > max { (i, p) } else { (best, max) }
                    })
                    .0
            })
            .collect();

        Ok(classes)
    }

    /// The fraction of examples whose predicted class matches their one-hot label.
    pub fn accuracy(&mut self, x: ArrayViewD<'_, f32>, y: ArrayView2<'_, f32>) -> Result<f32> {
        let predictions = self.predict(x)?;
        if predictions.is_empty() {
            return Ok(0.);
        }

        let hits = predictions
            .iter()
            .zip(y.axis_iter(Axis(0)))
            .filter(|(class, row)| row.get(**class).is_some_and(|&v| v > 0.5))
            .count();

        Ok(hits as f32 / predictions.len() as f32)
    }

    /// Returns a copy of every parameter tensor, in forward order.
    pub fn parameters(&self) -> Params {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|p| p.to_owned())
            .collect()
    }

    /// Every parameter tensor named `"{layer index}.{parameter name}"`.
    pub fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, l)| {
                l.named_parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("{i}.{name}"), p))
            })
            .collect()
    }

    /// A zeroed gradient with the model's layout.
    pub fn empty_gradient(&self) -> Gradient {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|p| ArrayD::zeros(p.raw_dim()))
            .collect()
    }

    /// The total amount of learnable scalars.
    pub fn size(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|p| p.len())
            .sum()
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    fn check_layout(&self, params: &Params) -> Result<()> {
        let shapes: Vec<_> = self
            .layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|p| p.shape().to_vec())
            .collect();

        if shapes.len() != params.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameter tensors",
                got: params.len(),
                expected: shapes.len(),
            });
        }

        for (shape, t) in shapes.iter().zip(params.iter()) {
            if shape.as_slice() != t.shape() {
                return Err(MlErr::ShapeMismatch {
                    what: "parameter tensor",
                    got: t.shape().to_vec(),
                    expected: shape.clone(),
                });
            }
        }

        Ok(())
    }

    /// Adds `delta` to the model's parameters.
    pub fn update_parameters(&mut self, delta: &Params) -> Result<()> {
        self.check_layout(delta)?;

        for (mut p, d) in self.parameters_mut().into_iter().zip(delta.iter()) {
            p += d;
        }

        Ok(())
    }

    /// Overwrites the model's parameters with `params`.
    pub fn set_parameters(&mut self, params: &Params) -> Result<()> {
        self.check_layout(params)?;

        for (mut p, t) in self.parameters_mut().into_iter().zip(params.iter()) {
            p.assign(t);
        }

        Ok(())
    }

    pub fn has_batch_norm(&self) -> bool {
        self.layers.iter().any(Layer::has_batch_norm)
    }

    /// Drops every cached activation and gradient.
    pub fn clear_cache(&mut self) {
        self.probs = None;
        self.layers.iter_mut().for_each(Layer::clear_cache);
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::new(self.layers.iter().map(Layer::snapshot).collect())
    }

    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        snapshot.check_version()?;

        let layers = snapshot
            .layers
            .into_iter()
            .map(|l| l.into_layer())
            .collect::<Result<Vec<_>>>()?;

        Self::new(layers)
    }

    /// Writes the model as JSON.
    pub fn dump<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, &self.snapshot())?;
        debug!(layers = self.layers.len(), size = self.size(); "model dumped");
        Ok(())
    }

    /// Reads a model written by `dump`.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let snapshot: ModelSnapshot = serde_json::from_reader(reader)?;
        Self::from_snapshot(snapshot)
    }
}

fn check_labels(probs: &Array2<f32>, y: ArrayView2<'_, f32>) -> Result<()> {
    if probs.shape() != y.shape() {
        return Err(MlErr::ShapeMismatch {
            what: "labels",
            got: y.shape().to_vec(),
            expected: probs.shape().to_vec(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{activations::ActFn, layers::testing::random_input},
        initialization::ParamGen,
    };

    fn model(seed: u64) -> Sequential {
        let mut rng = StdRng::seed_from_u64(seed);
        Sequential::new([
            Layer::dense((3, 4), ParamGen::Kaiming, &mut rng).unwrap(),
            Layer::activation(vec![4], ActFn::Tanh),
            Layer::layer_norm(vec![4]).unwrap(),
            Layer::dense((4, 3), ParamGen::Xavier, &mut rng).unwrap(),
        ])
        .unwrap()
    }

    fn labels(classes: &[usize], n: usize) -> Array2<f32> {
        let mut y = Array2::zeros((classes.len(), n));
        for (row, &c) in classes.iter().enumerate() {
            y[[row, c]] = 1.;
        }
        y
    }

    #[test]
    fn broken_chains_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let res = Sequential::new([
            Layer::dense((3, 4), ParamGen::Kaiming, &mut rng).unwrap(),
            Layer::dense((5, 2), ParamGen::Kaiming, &mut rng).unwrap(),
        ]);

        assert!(matches!(res, Err(MlErr::DimensionMismatch { .. })));
        assert!(Sequential::new(Vec::new()).is_err());
    }

    #[test]
    fn output_must_be_flat() {
        let res = Sequential::new([Layer::activation(vec![2, 2], ActFn::Relu)]);
        assert!(matches!(res, Err(MlErr::InvalidConfig(_))));
    }

    #[test]
    fn forward_returns_probabilities() {
        let mut model = model(1);
        let probs = model
            .forward(random_input(5, &[3], 2).view(), &mut Mode::Eval)
            .unwrap();

        assert_eq!(probs.shape(), &[5, 3]);
        for row in probs.rows() {
            assert!((row.sum() - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn forward_prop_keeps_every_output() {
        let mut model = model(1);
        let outputs = model
            .forward_prop(random_input(2, &[3], 2).view(), &mut Mode::Eval)
            .unwrap();

        let shapes: Vec<_> = outputs.iter().map(|o| o.shape().to_vec()).collect();
        assert_eq!(shapes, [vec![2, 4], vec![2, 4], vec![2, 4], vec![2, 3]]);
    }

    #[test]
    fn backward_without_forward_fails() {
        let mut model = model(1);
        assert!(matches!(
            model.backward(labels(&[0], 3).view()),
            Err(MlErr::EmptyCache { .. })
        ));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut model = model(3);
        let x = random_input(4, &[3], 4);
        let y = labels(&[0, 2, 1, 2], 3);

        let (_, grad) = model
            .loss_and_grad(x.view(), y.view(), &mut Mode::Eval)
            .unwrap();
        assert_eq!(grad.len(), 6);

        let params = model.parameters();
        let h = 1e-2;
        for (t, g) in grad.iter().enumerate() {
            for i in 0..g.len() {
                let mut nudged = params.clone();
                nudged.tensors_mut()[t].as_slice_mut().unwrap()[i] += h;
                model.set_parameters(&nudged).unwrap();
                let plus = model.loss(x.view(), y.view(), &mut Mode::Eval).unwrap();

                nudged.tensors_mut()[t].as_slice_mut().unwrap()[i] -= 2. * h;
                model.set_parameters(&nudged).unwrap();
                let minus = model.loss(x.view(), y.view(), &mut Mode::Eval).unwrap();

                let numeric = (plus - minus) / (2. * h);
                let analytic = g.as_slice().unwrap()[i];
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "param {t}[{i}]: numeric {numeric} analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn update_adds_and_set_assigns() {
        let mut model = model(1);
        let before = model.parameters();
        let delta = before.map(|_| 0.5);

        model.update_parameters(&delta).unwrap();
        let after = model.parameters();
        for (a, b) in after.iter().zip(before.iter()) {
            for (a, b) in a.iter().zip(b.iter()) {
                assert!((a - b - 0.5).abs() < 1e-6);
            }
        }

        model.set_parameters(&before).unwrap();
        assert_eq!(model.parameters(), before);
    }

    #[test]
    fn mismatched_parameters_are_rejected() {
        let mut model = model(1);
        let mut params = model.parameters();
        params.tensors_mut()[0] = ArrayD::zeros(IxDyn(&[4, 3]));

        assert!(matches!(
            model.set_parameters(&params),
            Err(MlErr::ShapeMismatch { .. })
        ));
        assert!(matches!(
            model.update_parameters(&Params::default()),
            Err(MlErr::SizeMismatch { .. })
        ));
    }

    #[test]
    fn parameter_names_carry_the_layer_index() {
        let model = model(1);
        let names: Vec<_> = model
            .named_parameters()
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(
            names,
            ["0.weights", "0.biases", "2.gamma", "2.beta", "3.weights", "3.biases"]
        );
        assert_eq!(model.empty_gradient().size(), model.size());
        assert_eq!(model.size(), 12 + 4 + 4 + 4 + 12 + 3);
    }

    #[test]
    fn dumped_models_predict_the_same() {
        let mut model = model(7);
        let x = random_input(6, &[3], 8);

        let mut buf = Vec::new();
        model.dump(&mut buf).unwrap();
        let mut loaded = Sequential::load(buf.as_slice()).unwrap();

        let a = model.forward(x.view(), &mut Mode::Eval).unwrap();
        let b = loaded.forward(x.view(), &mut Mode::Eval).unwrap();
        for (a, b) in a.iter().zip(b.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(model.predict(x.view()).unwrap(), loaded.predict(x.view()).unwrap());
    }

    #[test]
    fn accuracy_counts_matching_classes() {
        let mut model = model(1);
        let x = random_input(4, &[3], 2);
        let predicted = model.predict(x.view()).unwrap();

        assert_eq!(model.accuracy(x.view(), labels(&predicted, 3).view()).unwrap(), 1.);
    }
}
