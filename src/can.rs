//! Context Aggregation Network: a stack of dilated 3x3 convolutions that keeps the spatial
//! resolution while the receptive field grows exponentially with the dilation rates.
//!
//! See [Multi-Scale Context Aggregation by Dilated Convolutions](https://arxiv.org/abs/1511.07122).

use crate::model::{Classifier, ModelConfigExt};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::prelude::*;

/// Dilated 3x3 convolution followed by a leaky relu.
#[derive(Module, Debug)]
pub struct DilatedBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub activation: LeakyRelu,
}

impl<B: Backend> DilatedBlock<B> {
    /// # Shapes
    ///   - Input [batch, channels_in, height, width]
    ///   - Output [batch, channels_out, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.conv.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Can<B: Backend> {
    pub blocks: Vec<DilatedBlock<B>>,
    /// 1x1 convolution.
    /// Input channel: channels.
    /// Output channel: num_classes.
    pub classifier: Conv2d<B>,
    pub pool: AdaptiveAvgPool2d,
}

#[derive(Config, Debug)]
pub struct CanConfig {
    /// Side of the square input images.
    #[config(default = 32)]
    pub image_size: usize,

    #[config(default = 1)]
    pub in_channels: usize,

    /// Width of every dilated block.
    #[config(default = 32)]
    pub channels: usize,

    /// One 3x3 block per entry.
    #[config(default = "vec![1, 1, 2, 4, 8, 1]")]
    pub dilations: Vec<usize>,

    #[config(default = 0.1)]
    pub negative_slope: f64,

    #[config(default = 10)]
    pub num_classes: usize,
}

impl CanConfig {
    /// Side of the input window that influences a single output position.
    pub fn receptive_field(&self) -> usize {
        1 + self.dilations.iter().map(|d| 2 * d).sum::<usize>()
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Can<B> {
        assert!(!self.dilations.is_empty(), "at least one block is required");
        if self.receptive_field() < self.image_size {
            log::warn!(
                "receptive field {} does not cover the {}x{} input",
                self.receptive_field(),
                self.image_size,
                self.image_size
            );
        }

        let blocks = self
            .dilations
            .iter()
            .enumerate()
            .map(|(i, &dilation)| {
                assert_ne!(dilation, 0);
                let channels_in = if i == 0 {
                    self.in_channels
                } else {
                    self.channels
                };
                // padding = dilation keeps height and width
                let conv = Conv2dConfig::new([channels_in, self.channels], [3, 3])
                    .with_dilation([dilation, dilation])
                    .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
                    .init(device);
                DilatedBlock {
                    conv,
                    activation: LeakyReluConfig::new()
                        .with_negative_slope(self.negative_slope)
                        .init(),
                }
            })
            .collect();

        Can {
            blocks,
            classifier: Conv2dConfig::new([self.channels, self.num_classes], [1, 1]).init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

impl<B: Backend> ModelConfigExt<B> for CanConfig {
    type Model = Can<B>;

    fn init(&self, device: &B::Device) -> Self::Model {
        CanConfig::init(self, device)
    }

    fn image_size(&self) -> usize {
        self.image_size
    }
}

impl<B: Backend> Can<B> {
    /// # Shapes
    ///   - Input [batch, in_channels, height, width]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _in_channels, height, width] = images.dims();

        let mut x = images;
        for block in self.blocks.iter() {
            x = block.forward(x);
            debug_assert_eq!([height, width], [x.dims()[2], x.dims()[3]]);
        }

        // per-pixel class scores, averaged over the whole image
        let x = self.classifier.forward(x);
        let [_batch_size, num_classes, _height, _width] = x.dims();
        let x = self.pool.forward(x);
        debug_assert_eq!([batch_size, num_classes, 1, 1], x.dims());

        x.reshape([batch_size, num_classes])
    }
}

impl<B: Backend> Classifier<B> for Can<B> {
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
        let config = CanConfig::new();
        assert_eq!(35, config.receptive_field());

        let device = Default::default();
        let model: Can<TestBackend> = config.init(&device);
        assert_eq!(6, model.blocks.len());
        assert_eq!(46_890, model.num_params());

        let images = Tensor::<TestBackend, 4>::random(
            [2, 1, 32, 32],
            Distribution::Normal(0., 1.),
            &device,
        );
        assert_eq!([2, 10], model.forward(images).dims());
    }

    #[test]
    fn dilation_preserves_resolution() {
        let device = Default::default();
        let model: Can<TestBackend> = CanConfig::new()
            .with_channels(4)
            .with_dilations(vec![1, 3, 9])
            .init(&device);

        let x = Tensor::<TestBackend, 4>::ones([1, 1, 28, 28], &device);
        let x = model.blocks[0].forward(x);
        let x = model.blocks[1].forward(x);
        let x = model.blocks[2].forward(x);
        assert_eq!([1, 4, 28, 28], x.dims());
    }

    #[test]
    fn config_survives_json() {
        let config = CanConfig::new().with_dilations(vec![1, 2, 4]);
        let json = serde_json::to_string(&config).unwrap();
        let loaded: CanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(vec![1, 2, 4], loaded.dilations);
        assert_eq!(15, loaded.receptive_field());
    }
}
