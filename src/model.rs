use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::train::ClassificationOutput;

/// A [`Config`] that can build its model.
pub trait ModelConfigExt<B: Backend>: Config {
    type Model: Module<B> + Classifier<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
    /// Side of the square images the model is built for.
    fn image_size(&self) -> usize;
}

/// Image classifier over normalized MNIST batches.
pub trait Classifier<B: Backend> {
    /// # Shapes
    ///   - Input [batch, channels, height, width]
    ///   - Output [batch, num_classes]
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Runs the model and computes the cross-entropy loss against `targets`.
    fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let [batch_size, _channels, _height, _width] = images.dims();
        assert_eq!([batch_size], targets.dims());

        let output = self.logits(images);
        let [output_batch, _num_classes] = output.dims();
        assert_eq!(batch_size, output_batch);

        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// Counts how many argmax predictions match the targets.
///
/// Returns `(correct, total)`.
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> (usize, usize) {
    let [batch_size, _num_classes] = logits.dims();
    let predicted = logits.argmax(1).squeeze_dim::<1>(1);
    let correct = predicted
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    (correct as usize, batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32, i32>;

    #[test]
    fn counts_matching_predictions() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [2.0, -1.0, 0.5], [0.0, 0.2, 0.3]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 2], &device);

        assert_eq!((2, 3), accuracy(logits, targets));
    }
}
