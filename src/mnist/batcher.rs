use super::dataset::{HEIGHT, MnistItem, WIDTH};
use crate::backend::Element;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// Brightness mean of the MNIST train split, from the PyTorch MNIST example.
pub const MEAN: f64 = 0.1307;
/// Brightness standard deviation of the MNIST train split.
pub const STD: f64 = 0.3081;

/// Turns [`MnistItem`]s into normalized image batches, optionally resized.
#[derive(Clone, Debug)]
pub struct MnistBatcher {
    /// Side of the square images produced by the batcher.
    pub image_size: usize,
}

impl Default for MnistBatcher {
    fn default() -> Self {
        Self { image_size: WIDTH }
    }
}

impl MnistBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// The brightness, z-score normalized with the dataset statistics.
    ///
    /// The mappings are:
    ///
    /// * `z = (value / 255 - MEAN) / STD`,
    /// * `value = (z * STD + MEAN) * 255`.
    ///
    /// # Shape
    /// [batch_size, 1, image_size, image_size]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let (items_image, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label))
            .unzip();

        let images = items_image
            .into_iter()
            .map(|image: Vec<Element>| {
                TensorData::new(image, [1, 1, HEIGHT, WIDTH]).convert::<B::FloatElem>()
            })
            .map(|data| Tensor::<B, 4>::from_data(data, device))
            .collect();
        let images = Tensor::cat(images, 0);
        debug_assert_eq!([batch_size, 1, HEIGHT, WIDTH], images.dims());

        // e.g. LeNet-5 expects 32x32 inputs
        let images = if self.image_size != HEIGHT || self.image_size != WIDTH {
            interpolate(
                images,
                [self.image_size, self.image_size],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            )
        } else {
            images
        };
        debug_assert_eq!(
            [batch_size, 1, self.image_size, self.image_size],
            images.dims()
        );

        // scale between [0,1] and make the mean=0 and std=1
        let images = ((images / 255) - MEAN) / STD;

        let targets = items_label
            .into_iter()
            .map(|label: u8| {
                Tensor::<B, 1, Int>::from_data([(label as i64).elem::<B::IntElem>()], device)
            })
            .collect();
        let targets = Tensor::cat(targets, 0);

        MnistBatch { images, targets }
    }
}
