use std::panic::{self, AssertUnwindSafe};

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{
            transform::PartialDataset,
            vision::{MnistDataset, MnistItem},
            Dataset,
        },
    },
    prelude::*,
};
use ndarray::{Array1, Array2};

use crate::error::{Result, TrainError};

/// Side length of an MNIST image.
pub const IMAGE_SIZE: usize = 28;
/// Number of features of a flattened image.
pub const NUM_FEATURES: usize = IMAGE_SIZE * IMAGE_SIZE;
/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

const MAX_INTENSITY: f32 = 255.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MnistSplit {
    Train,
    Test,
}

impl MnistSplit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

/// Load an MNIST split, downloading it into the burn dataset cache on first use.
///
/// The burn loader panics when the download or decoding fails; that panic is
/// turned into [`TrainError::DatasetLoad`].
pub fn load_mnist(split: MnistSplit) -> Result<MnistDataset> {
    log::info!("Loading MNIST {} split...", split.name());

    panic::catch_unwind(AssertUnwindSafe(|| match split {
        MnistSplit::Train => MnistDataset::train(),
        MnistSplit::Test => MnistDataset::test(),
    }))
    .map_err(|payload| TrainError::DatasetLoad {
        split: split.name(),
        reason: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Normalized intensity of a raw pixel, computed in `f32` before widening.
pub fn normalize_pixel(pixel: f32) -> f64 {
    (pixel / MAX_INTENSITY) as f64
}

/// Flatten the first `limit` items of a dataset into a feature matrix.
///
/// Items are taken in dataset order, with no shuffling. Each row holds the
/// image pixels row by row, normalized to [0, 1].
pub fn flatten_items<D>(
    dataset: &D,
    limit: Option<usize>,
    split: &'static str,
) -> Result<(Array2<f64>, Array1<usize>)>
where
    D: Dataset<MnistItem> + ?Sized,
{
    let num_items = limit.map_or(dataset.len(), |limit| limit.min(dataset.len()));
    if num_items == 0 {
        return Err(TrainError::EmptyDataset { split });
    }

    let mut records = Array2::<f64>::zeros((num_items, NUM_FEATURES));
    let mut targets = Array1::<usize>::zeros(num_items);

    for index in 0..num_items {
        let Some(item) = dataset.get(index) else {
            break;
        };
        let pixels = item.image.iter().flatten().map(|pixel| normalize_pixel(*pixel));
        for (feature, value) in records.row_mut(index).iter_mut().zip(pixels) {
            *feature = value;
        }
        targets[index] = item.label as usize;
    }

    Ok((records, targets))
}

/// Split off the tail of a dataset as a validation set.
///
/// Returns `(train, valid)`. The training part keeps the first
/// `floor(len * (1 - fraction))` items in dataset order and the validation part
/// gets the rest, before any shuffling happens in the data loader.
pub fn split_validation<D>(
    dataset: D,
    fraction: f64,
) -> (
    PartialDataset<D, MnistItem>,
    PartialDataset<D, MnistItem>,
)
where
    D: Dataset<MnistItem> + Clone,
{
    let len = dataset.len();
    let boundary = ((len as f64) * (1.0 - fraction.clamp(0.0, 1.0))).floor() as usize;
    let boundary = boundary.min(len);

    let train = PartialDataset::new(dataset.clone(), 0, boundary);
    let valid = PartialDataset::new(dataset, boundary, len);

    (train, valid)
}

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    pub images: Tensor<B, 3>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, device))
            .map(|tensor| tensor.reshape([1, IMAGE_SIZE, IMAGE_SIZE]))
            .map(|tensor| tensor / MAX_INTENSITY)
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        MnistBatch { images, targets }
    }
}
