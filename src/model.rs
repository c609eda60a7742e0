use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::data::{MnistBatch, IMAGE_SIZE};

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    linear1: Linear<B>,
    linear2: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = "[32, 64]")]
    pub conv_channels: [usize; 2],
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl ModelConfig {
    /// Side length of the feature maps after both convolution and pooling stages.
    pub fn feature_map_size(&self) -> usize {
        // Valid convolution, then a 2x2 pool with stride 2 (floor).
        let stage = |size: usize| (size - self.kernel_size + 1) / 2;
        stage(stage(IMAGE_SIZE))
    }

    /// Number of inputs of the first dense layer.
    pub fn num_flat_features(&self) -> usize {
        let side = self.feature_map_size();
        self.conv_channels[1] * side * side
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let [channels_1, channels_2] = self.conv_channels;
        let kernel = [self.kernel_size, self.kernel_size];

        Model {
            conv1: Conv2dConfig::new([1, channels_1], kernel).init(device),
            conv2: Conv2dConfig::new([channels_1, channels_2], kernel).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            linear1: LinearConfig::new(self.num_flat_features(), self.hidden_size).init(device),
            linear2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, height, width]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, height, width] = images.dims();

        // Single grayscale channel.
        let x = images.reshape([batch_size, 1, height, width]);

        let x = self.conv1.forward(x); // [batch_size, 32, 26, 26]
        let x = self.activation.forward(x);
        let x = self.pool.forward(x); // [batch_size, 32, 13, 13]

        let x = self.conv2.forward(x); // [batch_size, 64, 11, 11]
        let x = self.activation.forward(x);
        let x = self.pool.forward(x); // [batch_size, 64, 5, 5]

        let x = x.flatten::<2>(1, 3); // [batch_size, 1600]
        let x = self.linear1.forward(x);
        let x = self.activation.forward(x);

        self.linear2.forward(x) // [batch_size, num_classes]
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 3>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<MnistBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: MnistBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: MnistBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    #[test]
    fn flat_features_match_the_topology() {
        let config = ModelConfig::new();

        assert_eq!(config.feature_map_size(), 5);
        assert_eq!(config.num_flat_features(), 1600);
    }

    #[test]
    fn forward_returns_one_logit_per_class() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 3>::zeros([3, IMAGE_SIZE, IMAGE_SIZE], &device);

        let output = model.forward(images);

        assert_eq!(output.dims(), [3, 10]);
    }

    #[test]
    fn train_step_produces_a_finite_loss() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestAutodiffBackend>(&device);
        let batch = MnistBatch {
            images: Tensor::ones([2, IMAGE_SIZE, IMAGE_SIZE], &device),
            targets: Tensor::from_ints([1, 7], &device),
        };

        let output = TrainStep::step(&model, batch);
        let loss: f32 = output.item.loss.into_scalar().elem();

        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }
}
