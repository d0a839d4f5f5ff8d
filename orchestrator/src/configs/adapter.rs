use std::{fs::File, io::BufReader, path::Path};

use log::info;
use machine_learning::{
    arch::{Sequential, blocks, layers::Layer},
    dataset::{Dataset, one_hot},
    training::TrainingParameters,
};
use ndarray::{ArrayD, IxDyn};
use rand::{SeedableRng, rngs::StdRng};

use super::{DatasetConfig, LayerConfig, ModelConfig, RunConfig};
use crate::error::OrchestratorError;

/// Turns a run configuration into the model and datasets the training engine works with.
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Validates `config` and builds everything it describes.
    ///
    /// # Arguments
    /// * `config` - The run configuration.
    /// * `training` - The training parameters in effect, which may be a persisted copy.
    ///
    /// # Returns
    /// The initial model, the training set and the validation set.
    pub fn adapt_configs(
        &self,
        config: &RunConfig,
        training: &TrainingParameters,
    ) -> Result<(Sequential, Dataset, Dataset), OrchestratorError> {
        let mut rng = StdRng::seed_from_u64(training.seed);

        let model = match (&config.model, &config.model_path) {
            (Some(model), None) => self.adapt_model(model, training, &mut rng)?,
            (None, Some(path)) => self.load_model(path)?,
            (Some(_), Some(_)) => {
                return Err(OrchestratorError::InvalidConfig(
                    "a run starts from either a model config or a model file, not both".into(),
                ));
            }
            (None, None) => {
                return Err(OrchestratorError::InvalidConfig(
                    "a run needs a model config or a model file".into(),
                ));
            }
        };
        let dataset = self.adapt_dataset(&config.dataset)?;

        if model.input_dims() != dataset.example_dims() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "the model takes examples of shape {:?} but the dataset holds {:?}",
                model.input_dims(),
                dataset.example_dims()
            )));
        }
        if model.num_classes() != dataset.num_classes() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "the model predicts {} classes but the dataset has {}",
                model.num_classes(),
                dataset.num_classes()
            )));
        }

        let (train_set, validation_set) =
            self.split(dataset, config.validation_fraction, &mut rng)?;
        Ok((model, train_set, validation_set))
    }

    // -------------------------------------------------------------------------
    // Model
    // -------------------------------------------------------------------------

    fn adapt_model(
        &self,
        model: &ModelConfig,
        training: &TrainingParameters,
        rng: &mut StdRng,
    ) -> Result<Sequential, OrchestratorError> {
        let layers = match model {
            ModelConfig::Mlp {
                dims,
                act_fn,
                init,
            } => blocks::mlp(
                dims,
                *act_fn,
                training.normalisation,
                &training.dropout_keep_probs,
                *init,
                rng,
            )?,
            ModelConfig::Sequential { layers } => self.adapt_layers(layers, rng)?,
        };

        Ok(Sequential::new(layers)?)
    }

    fn load_model(&self, path: &Path) -> Result<Sequential, OrchestratorError> {
        info!(path:% = path.display(); "loading model");
        let reader = BufReader::new(File::open(path)?);
        Ok(Sequential::load(reader)?)
    }

    fn adapt_layers(
        &self,
        layers: &[LayerConfig],
        rng: &mut StdRng,
    ) -> Result<Vec<Layer>, OrchestratorError> {
        if layers.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "a model must have at least one layer".into(),
            ));
        }

        layers
            .iter()
            .map(|layer| self.adapt_layer(layer, rng))
            .collect()
    }

    fn adapt_layer(
        &self,
        layer: &LayerConfig,
        rng: &mut StdRng,
    ) -> Result<Layer, OrchestratorError> {
        let layer = match layer {
            LayerConfig::Dense { dim, init } => Layer::dense(*dim, *init, rng)?,
            LayerConfig::Activation { dims, act_fn } => Layer::activation(dims.clone(), *act_fn),
            LayerConfig::Dropout { dims, keep_prob } => Layer::dropout(dims.clone(), *keep_prob)?,
            LayerConfig::LayerNorm { dims } => Layer::layer_norm(dims.clone())?,
            LayerConfig::BatchNorm { dims } => Layer::batch_norm(dims.clone())?,
            LayerConfig::Average { input_dims, axes } => {
                Layer::average(input_dims.clone(), axes.clone())?
            }
            LayerConfig::Convolution {
                input_dims,
                n_kernels,
                kernel_size,
                init,
            } => Layer::convolution(input_dims, *n_kernels, *kernel_size, *init, rng)?,
            LayerConfig::MaxPool { input_dims, size } => Layer::max_pool(input_dims, *size)?,
            LayerConfig::Flatten { input_dims } => Layer::flatten(input_dims.clone())?,
            LayerConfig::Residual { layers } => Layer::residual(self.adapt_layers(layers, rng)?)?,
        };

        Ok(layer)
    }

    // -------------------------------------------------------------------------
    // Dataset
    // -------------------------------------------------------------------------

    fn adapt_dataset(&self, dataset: &DatasetConfig) -> Result<Dataset, OrchestratorError> {
        let DatasetConfig::Inline {
            data,
            example_dims,
            labels,
            num_classes,
        } = dataset;

        let example_size: usize = example_dims.iter().product();
        if labels.is_empty() || example_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "the dataset must hold at least one non empty example".into(),
            ));
        }
        if data.len() != labels.len() * example_size {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} labels of examples shaped {example_dims:?} need {} values, got {}",
                labels.len(),
                labels.len() * example_size,
                data.len()
            )));
        }

        let mut shape = vec![labels.len()];
        shape.extend_from_slice(example_dims);
        let x = ArrayD::from_shape_vec(IxDyn(&shape), data.clone())
            .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;

        Ok(Dataset::new(x, one_hot(labels, *num_classes)?)?)
    }

    /// Shuffles `dataset` and holds out a `fraction` of it for validation.
    fn split(
        &self,
        dataset: Dataset,
        fraction: f32,
        rng: &mut StdRng,
    ) -> Result<(Dataset, Dataset), OrchestratorError> {
        if !(fraction > 0. && fraction < 1.) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "the validation fraction must be within (0, 1), got {fraction}"
            )));
        }

        let n = dataset.len();
        let held_out = ((n as f32 * fraction).round() as usize).max(1);
        if held_out >= n {
            return Err(OrchestratorError::InvalidConfig(format!(
                "can't hold out {held_out} of {n} examples for validation"
            )));
        }

        Ok(dataset.shuffled(rng).split(n - held_out)?)
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use machine_learning::{
        arch::{activations::ActFn, layers::NormalisationType},
        initialization::ParamGen,
    };

    use super::*;

    fn dataset(n: usize) -> DatasetConfig {
        DatasetConfig::Inline {
            data: (0..n * 4).map(|i| (i % 7) as f32 / 7.).collect(),
            example_dims: vec![1, 2, 2],
            labels: (0..n).map(|i| i % 3).collect(),
            num_classes: 3,
        }
    }

    fn config(model: ModelConfig, dataset: DatasetConfig) -> RunConfig {
        RunConfig {
            model: Some(model),
            model_path: None,
            training: TrainingParameters::default(),
            dataset,
            validation_fraction: 0.25,
            output_dir: PathBuf::from("unused"),
        }
    }

    fn mlp(dims: Vec<usize>) -> ModelConfig {
        ModelConfig::Mlp {
            dims,
            act_fn: ActFn::Relu,
            init: ParamGen::Kaiming,
        }
    }

    fn flat_mlp() -> ModelConfig {
        ModelConfig::Sequential {
            layers: vec![
                LayerConfig::Flatten {
                    input_dims: vec![1, 2, 2],
                },
                LayerConfig::Dense {
                    dim: (4, 6),
                    init: ParamGen::Kaiming,
                },
                LayerConfig::Activation {
                    dims: vec![6],
                    act_fn: ActFn::Tanh,
                },
                LayerConfig::Residual {
                    layers: vec![LayerConfig::Dense {
                        dim: (6, 6),
                        init: ParamGen::Xavier,
                    }],
                },
                LayerConfig::Dense {
                    dim: (6, 3),
                    init: ParamGen::Kaiming,
                },
            ],
        }
    }

    #[test]
    fn explicit_layers_are_built_in_order() {
        let config = config(flat_mlp(), dataset(20));
        let (model, train, validation) = Adapter::new()
            .adapt_configs(&config, &config.training)
            .unwrap();

        let names: Vec<&str> = model.layers().iter().map(Layer::name).collect();
        assert_eq!(names.len(), 5);
        assert_eq!(names[3], "residual");
        assert_eq!(train.len(), 15);
        assert_eq!(validation.len(), 5);
        assert_eq!(train.example_dims(), [1, 2, 2]);
    }

    #[test]
    fn mlps_take_normalisation_and_dropout_from_the_training_parameters() {
        let config = config(mlp(vec![4, 5, 3]), flat_dataset(12));
        let training = TrainingParameters {
            normalisation: NormalisationType::Layer,
            dropout_keep_probs: vec![0.5],
            ..TrainingParameters::default()
        };

        let (model, _, _) = Adapter::new().adapt_configs(&config, &training).unwrap();
        let plain = Adapter::new()
            .adapt_configs(&config, &config.training)
            .unwrap()
            .0;

        assert_eq!(model.layers().len(), plain.layers().len() + 2);
    }

    #[test]
    fn the_same_seed_builds_the_same_run() {
        let config = config(mlp(vec![4, 5, 3]), flat_dataset(12));
        let adapter = Adapter::new();

        let (a, train_a, _) = adapter.adapt_configs(&config, &config.training).unwrap();
        let (b, train_b, _) = adapter.adapt_configs(&config, &config.training).unwrap();

        assert_eq!(a.parameters(), b.parameters());
        assert_eq!(train_a, train_b);
    }

    #[test]
    fn mismatched_data_is_rejected() {
        let DatasetConfig::Inline {
            mut data,
            example_dims,
            labels,
            num_classes,
        } = flat_dataset(8);
        data.pop();
        let config = config(
            mlp(vec![4, 3]),
            DatasetConfig::Inline {
                data,
                example_dims,
                labels,
                num_classes,
            },
        );

        assert!(matches!(
            Adapter::new().adapt_configs(&config, &config.training),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn models_must_fit_the_dataset() {
        let adapter = Adapter::new();

        let wrong_input = config(mlp(vec![5, 3]), flat_dataset(8));
        assert!(matches!(
            adapter.adapt_configs(&wrong_input, &wrong_input.training),
            Err(OrchestratorError::InvalidConfig(_))
        ));

        let wrong_classes = config(mlp(vec![4, 2]), flat_dataset(8));
        assert!(matches!(
            adapter.adapt_configs(&wrong_classes, &wrong_classes.training),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validation_fractions_must_leave_both_sets_non_empty() {
        let adapter = Adapter::new();

        for fraction in [0., 1., 0.99] {
            let config = RunConfig {
                validation_fraction: fraction,
                ..config(mlp(vec![4, 3]), flat_dataset(4))
            };
            assert!(
                adapter.adapt_configs(&config, &config.training).is_err(),
                "{fraction}"
            );
        }
    }

    #[test]
    fn saved_models_are_loaded_instead_of_built() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let config = config(mlp(vec![4, 5, 3]), flat_dataset(12));
        let adapter = Adapter::new();

        let (built, _, _) = adapter.adapt_configs(&config, &config.training).unwrap();
        built.dump(File::create(&path).unwrap()).unwrap();

        let from_file = RunConfig {
            model: None,
            model_path: Some(path),
            training: TrainingParameters {
                seed: 7,
                ..TrainingParameters::default()
            },
            ..config
        };
        let (loaded, _, _) = adapter
            .adapt_configs(&from_file, &from_file.training)
            .unwrap();

        assert_eq!(loaded.parameters(), built.parameters());
    }

    #[test]
    fn runs_need_exactly_one_model_source() {
        let adapter = Adapter::new();

        let both = RunConfig {
            model_path: Some(PathBuf::from("model.json")),
            ..config(mlp(vec![4, 3]), flat_dataset(8))
        };
        assert!(matches!(
            adapter.adapt_configs(&both, &both.training),
            Err(OrchestratorError::InvalidConfig(_))
        ));

        let neither = RunConfig {
            model: None,
            ..config(mlp(vec![4, 3]), flat_dataset(8))
        };
        assert!(matches!(
            adapter.adapt_configs(&neither, &neither.training),
            Err(OrchestratorError::InvalidConfig(_))
        ));

        let missing = RunConfig {
            model: None,
            model_path: Some(PathBuf::from("no/such/model.json")),
            ..config(mlp(vec![4, 3]), flat_dataset(8))
        };
        assert!(matches!(
            adapter.adapt_configs(&missing, &missing.training),
            Err(OrchestratorError::Io(_))
        ));
    }

    #[test]
    fn empty_layer_lists_are_rejected() {
        let config = config(ModelConfig::Sequential { layers: vec![] }, flat_dataset(4));
        assert!(matches!(
            Adapter::new().adapt_configs(&config, &config.training),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    fn flat_dataset(n: usize) -> DatasetConfig {
        let DatasetConfig::Inline {
            data,
            labels,
            num_classes,
            ..
        } = dataset(n);
        DatasetConfig::Inline {
            data,
            example_dims: vec![4],
            labels,
            num_classes,
        }
    }
}
