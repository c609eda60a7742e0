use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::{vision::MnistItem, Dataset},
    },
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LossMetric},
        LearnerBuilder,
    },
};

use crate::data::{split_validation, MnistBatch, MnistBatcher};
use crate::error::TrainError;
use crate::model::{Model, ModelConfig};

#[derive(Config)]
pub struct CnnTrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 3)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    /// Fraction of the training set, taken from its tail, used for validation.
    #[config(default = 0.1)]
    pub validation_split: f64,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Learner logs, checkpoints and the training config.
    #[config(default = "String::from(\"mnist-artifacts\")")]
    pub artifact_dir: String,
}

impl CnnTrainingConfig {
    /// Topology and optimizer settings of the reference MNIST network.
    pub fn mnist() -> Self {
        Self::new(ModelConfig::new(), AdamConfig::new().with_epsilon(1e-7))
    }
}

/// Train the network on `train_set`, then report its accuracy on `test_set`.
///
/// The last `validation_split` of `train_set` is held out for validation.
pub fn train<B, D, T>(
    config: &CnnTrainingConfig,
    train_set: D,
    test_set: T,
    device: B::Device,
) -> crate::Result<Model<B::InnerBackend>>
where
    B: AutodiffBackend,
    D: Dataset<MnistItem> + 'static,
    T: Dataset<MnistItem>,
{
    let (train_split, valid_split) = split_validation(Arc::new(train_set), config.validation_split);
    if train_split.is_empty() {
        return Err(TrainError::EmptyDataset { split: "train" });
    }

    let artifact_dir = Path::new(&config.artifact_dir);
    std::fs::create_dir_all(artifact_dir).map_err(|err| TrainError::io(artifact_dir, err))?;
    let config_path = artifact_dir.join("config.json");
    config
        .save(&config_path)
        .map_err(|err| TrainError::io(&config_path, err))?;

    B::seed(config.seed);

    log::info!(
        "Training on {} images, validating on {}",
        train_split.len(),
        valid_split.len()
    );

    let batcher = MnistBatcher::default();

    let dataloader_train = DataLoaderBuilder::new(batcher.clone())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_split);

    let dataloader_valid = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid_split);

    let learner = LearnerBuilder::new(&config.artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let now = Instant::now();
    let model_trained = learner.fit(dataloader_train, dataloader_valid);
    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    let model = model_trained.valid();
    let accuracy = evaluate(&model, &test_set, config.batch_size, &device)?;
    log::info!("Test accuracy: {:.4}", accuracy);

    Ok(model)
}

/// Fraction of the items of `dataset` the model classifies correctly.
pub fn evaluate<B, D>(
    model: &Model<B>,
    dataset: &D,
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<f64>
where
    B: Backend,
    D: Dataset<MnistItem>,
{
    let len = dataset.len();
    if len == 0 {
        return Err(TrainError::EmptyDataset { split: "test" });
    }

    let batcher = MnistBatcher::default();
    let mut num_correct = 0;

    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size.max(1)).min(len);
        let items = (start..end).filter_map(|index| dataset.get(index)).collect();
        let batch: MnistBatch<B> = batcher.batch(items, device);

        let predictions = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);
        let correct = predictions.equal(batch.targets).int().sum().into_scalar();
        num_correct += correct.elem::<i64>() as usize;
    }

    Ok(num_correct as f64 / len as f64)
}
