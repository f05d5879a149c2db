//! Modified LeNet-5: ReLU activations and max pooling instead of the original tanh and
//! trainable subsampling, with a plain linear classifier on top.

use crate::model::{Classifier, ModelConfigExt};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::prelude::*;

#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    /// Input channel: in_channels.
    /// Output channel: conv1_channels.
    pub conv1: Conv2d<B>,
    /// Input channel: conv1_channels.
    /// Output channel: conv2_channels.
    pub conv2: Conv2d<B>,
    /// Input channel: conv2_channels.
    /// Output channel: conv3_channels.
    pub conv3: Conv2d<B>,
    pub pool: MaxPool2d,
    /// Input: conv3_channels * feature_size².
    /// Output: hidden_size.
    pub fc1: Linear<B>,
    /// Input: hidden_size.
    /// Output: num_classes.
    pub fc2: Linear<B>,
    pub dropout: Dropout,
    pub activation: Relu,
}

#[derive(Config, Debug)]
pub struct LeNetConfig {
    /// Side of the square input images.
    ///
    /// The classic architecture expects 32x32, so MNIST digits get resized by the batcher.
    #[config(default = 32)]
    pub image_size: usize,

    #[config(default = 1)]
    pub in_channels: usize,

    #[config(default = 6)]
    pub conv1_channels: usize,

    #[config(default = 16)]
    pub conv2_channels: usize,

    #[config(default = 120)]
    pub conv3_channels: usize,

    #[config(default = 84)]
    pub hidden_size: usize,

    /// Kernel side shared by the three convolutions.
    #[config(default = 5)]
    pub kernel_size: usize,

    /// Dropout applied before the last linear layer.
    #[config(default = 0.0)]
    pub dropout: f64,

    #[config(default = 10)]
    pub num_classes: usize,
}

impl LeNetConfig {
    /// Spatial side of the feature map left after `conv3`.
    ///
    /// Each convolution shrinks the side by `kernel_size - 1` and each pooling halves it.
    pub fn feature_size(&self) -> usize {
        let shrink = |side: usize| side.saturating_sub(self.kernel_size.saturating_sub(1));
        let side = shrink(self.image_size) / 2;
        let side = shrink(side) / 2;
        shrink(side)
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet<B> {
        assert_ne!(self.kernel_size, 0);
        let feature_size = self.feature_size();
        assert!(
            feature_size > 0,
            "image_size={} is too small for kernel_size={}",
            self.image_size,
            self.kernel_size
        );
        let kernel = [self.kernel_size, self.kernel_size];

        LeNet {
            conv1: Conv2dConfig::new([self.in_channels, self.conv1_channels], kernel).init(device),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], kernel)
                .init(device),
            conv3: Conv2dConfig::new([self.conv2_channels, self.conv3_channels], kernel)
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(
                self.conv3_channels * feature_size * feature_size,
                self.hidden_size,
            )
            .init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> ModelConfigExt<B> for LeNetConfig {
    type Model = LeNet<B>;

    fn init(&self, device: &B::Device) -> Self::Model {
        LeNetConfig::init(self, device)
    }

    fn image_size(&self) -> usize {
        self.image_size
    }
}

impl<B: Backend> LeNet<B> {
    /// # Shapes
    ///   - Input [batch, in_channels, image_size, image_size]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _in_channels, _height, _width] = images.dims();

        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.pool.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool.forward(x);
        let x = self.activation.forward(self.conv3.forward(x));

        let [_batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        let x = self.fc2.forward(x);

        let [_d_input, num_classes] = self.fc2.weight.dims();
        debug_assert_eq!([batch_size, num_classes], x.dims());
        x
    }
}

impl<B: Backend> Classifier<B> for LeNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32, i32>;

    #[test]
    fn default_shapes() {
        let config = LeNetConfig::new();
        assert_eq!(1, config.feature_size());

        let device = Default::default();
        let model: LeNet<TestBackend> = config.init(&device);
        assert_eq!(61_706, model.num_params());

        let images = Tensor::<TestBackend, 4>::random(
            [3, 1, 32, 32],
            Distribution::Normal(0., 1.),
            &device,
        );
        assert_eq!([3, 10], model.forward(images).dims());
    }

    #[test]
    fn larger_images_keep_a_wider_feature_map() {
        let config = LeNetConfig::new().with_image_size(44);
        // 44 -> 40 -> 20 -> 16 -> 8 -> 4
        assert_eq!(4, config.feature_size());

        let device = Default::default();
        let model: LeNet<TestBackend> = config.init(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 1, 44, 44], &device);
        assert_eq!([2, 10], model.forward(images).dims());
    }

    #[test]
    fn zero_kernel_feature_size() {
        // 32 -> 32 -> 16 -> 16 -> 8 -> 8
        let config = LeNetConfig::new().with_kernel_size(0);
        assert_eq!(8, config.feature_size());
        assert_eq!(
            config.feature_size(),
            config.clone().with_kernel_size(1).feature_size()
        );
    }

    #[test]
    #[should_panic(expected = "too small")]
    fn rejects_unresized_mnist_images() {
        // 28 -> 24 -> 12 -> 8 -> 4 -> 0
        let config = LeNetConfig::new().with_image_size(28);
        assert_eq!(0, config.feature_size());
        let _model: LeNet<TestBackend> = config.init(&Default::default());
    }
}
