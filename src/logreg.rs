use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use burn::config::Config;
use burn::data::dataset::{vision::MnistItem, Dataset};
use linfa::traits::Fit;
use linfa::Dataset as LinfaDataset;
use linfa_logistic::MultiLogisticRegression;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{flatten_items, load_mnist, MnistSplit, NUM_CLASSES, NUM_FEATURES};
use crate::error::TrainError;

#[derive(Config, Debug)]
pub struct LogRegConfig {
    /// Number of leading training images used for fitting.
    #[config(default = 10_000)]
    pub train_subset: usize,
    #[config(default = 200)]
    pub max_iterations: u64,
    /// L2 penalty on the weights.
    #[config(default = 1.0)]
    pub alpha: f64,
    #[config(default = 1e-4)]
    pub gradient_tolerance: f64,
    #[config(default = "String::from(\"../public/model/logreg/logreg.json\")")]
    pub output_path: String,
}

/// Parameters of a fitted multinomial logistic regression, in the flat layout
/// read by the inference runtime.
///
/// `weights[i * out_dim + k]` is the weight of feature `i` for class `k`, and
/// `bias[k]` the intercept of class `k`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "WeightsDocument")]
pub struct LogRegWeights {
    #[serde(rename = "inDim")]
    in_dim: usize,
    #[serde(rename = "outDim")]
    out_dim: usize,
    #[serde(rename = "W")]
    weights: Vec<f64>,
    #[serde(rename = "b")]
    bias: Vec<f64>,
}

/// The JSON document as read from disk, before its dimensions are checked.
#[derive(Deserialize)]
struct WeightsDocument {
    #[serde(rename = "inDim")]
    in_dim: usize,
    #[serde(rename = "outDim")]
    out_dim: usize,
    #[serde(rename = "W")]
    weights: Vec<f64>,
    #[serde(rename = "b")]
    bias: Vec<f64>,
}

impl TryFrom<WeightsDocument> for LogRegWeights {
    type Error = TrainError;

    fn try_from(document: WeightsDocument) -> crate::Result<Self> {
        if document.in_dim != NUM_FEATURES {
            return Err(TrainError::Shape {
                name: "inDim",
                expected: NUM_FEATURES,
                actual: document.in_dim,
            });
        }
        if document.out_dim != NUM_CLASSES {
            return Err(TrainError::Shape {
                name: "outDim",
                expected: NUM_CLASSES,
                actual: document.out_dim,
            });
        }

        Self::new(document.weights, document.bias)
    }
}

impl LogRegWeights {
    pub fn new(weights: Vec<f64>, bias: Vec<f64>) -> crate::Result<Self> {
        let expected = NUM_FEATURES * NUM_CLASSES;
        if weights.len() != expected {
            return Err(TrainError::Shape {
                name: "W",
                expected,
                actual: weights.len(),
            });
        }
        if bias.len() != NUM_CLASSES {
            return Err(TrainError::Shape {
                name: "b",
                expected: NUM_CLASSES,
                actual: bias.len(),
            });
        }

        Ok(Self {
            in_dim: NUM_FEATURES,
            out_dim: NUM_CLASSES,
            weights,
            bias,
        })
    }

    /// Build from a `(features, classes)` parameter matrix and a per-class intercept.
    pub fn from_params(params: &Array2<f64>, intercept: &Array1<f64>) -> crate::Result<Self> {
        if params.dim() != (NUM_FEATURES, NUM_CLASSES) {
            return Err(TrainError::Shape {
                name: "W",
                expected: NUM_FEATURES * NUM_CLASSES,
                actual: params.len(),
            });
        }

        // Logical iteration order is row-major whatever the memory layout.
        Self::new(params.iter().copied().collect(), intercept.to_vec())
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    fn matrix(&self) -> Array2<f64> {
        Array2::from_shape_vec((self.in_dim, self.out_dim), self.weights.clone())
            .expect("weights length is validated on construction")
    }

    /// Class scores for a batch of flattened, normalized images.
    pub fn scores(&self, records: &Array2<f64>) -> Array2<f64> {
        records.dot(&self.matrix()) + &Array1::from(self.bias.clone())
    }

    /// Predicted digit for each row of `records`.
    pub fn predict(&self, records: &Array2<f64>) -> Vec<usize> {
        self.scores(records)
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (class, score)| {
                        if *score > best.1 {
                            (class, *score)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }

    /// Fraction of the items of `dataset` classified correctly.
    pub fn accuracy<D: Dataset<MnistItem>>(&self, dataset: &D) -> crate::Result<f64> {
        let (records, targets) = flatten_items(dataset, None, "test")?;
        let predictions = self.predict(&records);
        let correct = predictions
            .iter()
            .zip(targets.iter())
            .filter(|(predicted, target)| predicted == target)
            .count();

        Ok(correct as f64 / targets.len() as f64)
    }

    /// Write the JSON document to `path`.
    ///
    /// Parent directories are not created: a missing directory is an error.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|err| TrainError::io(path, err))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer(&mut writer, self)?;
        writer.flush().map_err(|err| TrainError::io(path, err))?;

        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| TrainError::io(path, err))?;
        let document: WeightsDocument = serde_json::from_reader(BufReader::new(file))?;

        Self::try_from(document)
    }
}

/// Fit a multinomial logistic regression with L-BFGS on the leading
/// `config.train_subset` items of `train`.
pub fn fit<D: Dataset<MnistItem>>(
    config: &LogRegConfig,
    train: &D,
) -> crate::Result<LogRegWeights> {
    log::info!("Normalizing...");
    let (records, targets) = flatten_items(train, Some(config.train_subset), "train")?;

    // Columns of the fitted parameters follow the sorted class labels, so
    // every digit has to be present for column k to mean digit k.
    let classes: BTreeSet<usize> = targets.iter().copied().collect();
    if classes.len() != NUM_CLASSES || classes.iter().any(|class| *class >= NUM_CLASSES) {
        return Err(TrainError::MissingClasses {
            found: classes.into_iter().collect(),
        });
    }

    log::info!(
        "Fitting on {} images with L-BFGS (max {} iterations)",
        records.nrows(),
        config.max_iterations
    );

    let dataset = LinfaDataset::new(records, targets);
    let model = MultiLogisticRegression::default()
        .alpha(config.alpha)
        .gradient_tolerance(config.gradient_tolerance)
        .max_iterations(config.max_iterations)
        .with_intercept(true)
        .fit(&dataset)
        .map_err(|err| TrainError::Fit(err.to_string()))?;

    log::info!("Exporting weights...");
    LogRegWeights::from_params(model.params(), model.intercept())
}

/// Fit on `train`, report the accuracy on `test` and save the weights.
pub fn run_with<D, T>(config: &LogRegConfig, train: &D, test: &T) -> crate::Result<f64>
where
    D: Dataset<MnistItem>,
    T: Dataset<MnistItem>,
{
    log::info!("Training logistic regression...");
    let weights = fit(config, train)?;

    let accuracy = weights.accuracy(test)?;
    log::info!("Accuracy: {accuracy}");

    log::info!("Saving to: {}", config.output_path);
    weights.save(&config.output_path)?;

    Ok(accuracy)
}

/// Run the whole pipeline on the MNIST dataset.
pub fn run(config: &LogRegConfig) -> crate::Result<f64> {
    let train = load_mnist(MnistSplit::Train)?;
    let test = load_mnist(MnistSplit::Test)?;

    run_with(config, &train, &test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::{item, synthetic_dataset};
    use burn::data::dataset::InMemDataset;
    use rstest::rstest;

    fn small_config() -> LogRegConfig {
        LogRegConfig::new().with_max_iterations(50)
    }

    #[test]
    fn default_config_matches_the_export_contract() {
        let config = LogRegConfig::new();

        assert_eq!(config.train_subset, 10_000);
        assert_eq!(config.max_iterations, 200);
        assert_eq!(config.output_path, "../public/model/logreg/logreg.json");
    }

    #[test]
    fn params_are_flattened_feature_major() {
        let params = Array2::from_shape_fn((NUM_FEATURES, NUM_CLASSES), |(i, k)| {
            (i * NUM_CLASSES + k) as f64
        });
        let intercept = Array1::from_shape_fn(NUM_CLASSES, |k| k as f64);

        let weights = LogRegWeights::from_params(&params, &intercept).unwrap();

        assert_eq!(weights.weights().len(), 7840);
        for (index, value) in weights.weights().iter().enumerate() {
            assert_eq!(*value, index as f64);
        }
        assert_eq!(weights.bias(), intercept.as_slice().unwrap());
    }

    #[test]
    fn transposed_storage_flattens_the_same() {
        let params = Array2::from_shape_fn((NUM_CLASSES, NUM_FEATURES), |(k, i)| {
            (i * NUM_CLASSES + k) as f64
        });
        let intercept = Array1::zeros(NUM_CLASSES);

        let weights = LogRegWeights::from_params(&params.t().to_owned(), &intercept).unwrap();
        let from_view = LogRegWeights::from_params(&params.reversed_axes(), &intercept).unwrap();

        assert_eq!(weights, from_view);
        assert_eq!(weights.weights()[NUM_CLASSES + 3], (NUM_CLASSES + 3) as f64);
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let result = LogRegWeights::new(vec![0.0; 7839], vec![0.0; 10]);
        assert!(matches!(
            result,
            Err(TrainError::Shape {
                name: "W",
                expected: 7840,
                actual: 7839
            })
        ));

        let result = LogRegWeights::new(vec![0.0; 7840], vec![0.0; 9]);
        assert!(matches!(result, Err(TrainError::Shape { name: "b", .. })));

        let params = Array2::zeros((NUM_CLASSES, NUM_FEATURES + 1));
        let result = LogRegWeights::from_params(&params, &Array1::zeros(NUM_CLASSES));
        assert!(matches!(result, Err(TrainError::Shape { name: "W", .. })));
    }

    #[test]
    fn json_has_the_four_fields() {
        let weights = LogRegWeights::new(vec![0.5; 7840], vec![-1.0; 10]).unwrap();

        let value = serde_json::to_value(&weights).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 4);
        assert_eq!(object["inDim"], 784);
        assert_eq!(object["outDim"], 10);
        assert_eq!(object["W"].as_array().unwrap().len(), 7840);
        assert_eq!(object["b"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn predict_uses_feature_major_layout() {
        let mut weights = vec![0.0; 7840];
        // Feature 5 votes for class 2, feature 700 for class 8.
        weights[5 * NUM_CLASSES + 2] = 1.0;
        weights[700 * NUM_CLASSES + 8] = 1.0;
        let weights = LogRegWeights::new(weights, vec![0.0; 10]).unwrap();

        let mut records = Array2::zeros((2, NUM_FEATURES));
        records[[0, 5]] = 1.0;
        records[[1, 700]] = 1.0;

        assert_eq!(weights.predict(&records), vec![2, 8]);
    }

    #[test]
    fn fit_separates_synthetic_digits() {
        let train = synthetic_dataset(5);

        let weights = fit(&small_config(), &train).unwrap();

        assert_eq!(weights.in_dim(), 784);
        assert_eq!(weights.out_dim(), 10);
        assert_eq!(weights.weights().len(), weights.in_dim() * weights.out_dim());
        assert_eq!(weights.bias().len(), weights.out_dim());
        assert_eq!(weights.accuracy(&train).unwrap(), 1.0);
    }

    #[test]
    fn fit_is_deterministic() {
        let train = synthetic_dataset(3);

        let first = fit(&small_config(), &train).unwrap();
        let second = fit(&small_config(), &train).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn fit_only_uses_the_leading_subset() {
        let mut items: Vec<MnistItem> = synthetic_dataset(2).iter().collect();
        items.extend((0..5).map(|_| item(0, 255.0)));
        let padded = InMemDataset::new(items);
        let config = small_config().with_train_subset(20);

        let from_padded = fit(&config, &padded).unwrap();
        let from_subset = fit(&config, &synthetic_dataset(2)).unwrap();

        assert_eq!(from_padded, from_subset);
    }

    #[test]
    fn fit_requires_every_class() {
        let items = (0..20).map(|index| item((index % 9) as u8, 0.0)).collect();
        let train = InMemDataset::new(items);

        let result = fit(&small_config(), &train);

        assert!(matches!(result, Err(TrainError::MissingClasses { found }) if found.len() == 9));
    }

    #[test]
    fn fit_on_empty_dataset_fails() {
        let train = InMemDataset::<MnistItem>::new(vec![]);

        let result = fit(&small_config(), &train);

        assert!(matches!(result, Err(TrainError::EmptyDataset { .. })));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logreg.json");
        let weights = LogRegWeights::new(vec![0.25; 7840], vec![0.125; 10]).unwrap();

        weights.save(&path).unwrap();

        assert_eq!(LogRegWeights::load(&path).unwrap(), weights);
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("logreg.json");
        let weights = LogRegWeights::new(vec![0.0; 7840], vec![0.0; 10]).unwrap();

        let result = weights.save(&path);

        assert!(matches!(result, Err(TrainError::Io { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn deserializing_checks_lengths() {
        let result = serde_json::from_str::<LogRegWeights>(
            r#"{"inDim":784,"outDim":10,"W":[1.0,2.0],"b":[0.0]}"#,
        );

        let err = result.unwrap_err();
        assert!(err.to_string().contains("expected 7840 values for W"), "{err}");
    }

    #[test]
    fn deserialized_weights_predict() {
        let mut weights = vec![0.0; 7840];
        weights[3 * NUM_CLASSES + 4] = 1.0;
        let json = serde_json::to_string(&LogRegWeights::new(weights, vec![0.0; 10]).unwrap())
            .unwrap();

        let parsed: LogRegWeights = serde_json::from_str(&json).unwrap();
        let mut records = Array2::zeros((1, NUM_FEATURES));
        records[[0, 3]] = 1.0;

        assert_eq!(parsed.predict(&records), vec![4]);
    }

    #[rstest]
    #[case(5, 10, "inDim")]
    #[case(784, 3, "outDim")]
    #[case(5, 3, "inDim")]
    fn load_rejects_foreign_dimensions(
        #[case] in_dim: usize,
        #[case] out_dim: usize,
        #[case] field: &'static str,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logreg.json");
        let weights = vec![0.0; 7840];
        let bias = vec![0.0; 10];
        let document = serde_json::json!({
            "inDim": in_dim,
            "outDim": out_dim,
            "W": weights,
            "b": bias,
        });
        std::fs::write(&path, document.to_string()).unwrap();

        let result = LogRegWeights::load(&path);

        assert!(matches!(result, Err(TrainError::Shape { name, .. }) if name == field));
    }

    #[test]
    fn load_rejects_truncated_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logreg.json");
        std::fs::write(&path, r#"{"inDim":784,"outDim":10,"W":[1.0,2.0],"b":[]}"#).unwrap();

        let result = LogRegWeights::load(&path);

        assert!(matches!(result, Err(TrainError::Shape { name: "W", .. })));
    }
}
