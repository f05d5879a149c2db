use burn::optim::AdamConfig;
use burn_mnist_nets::prelude::*;

/// Context Aggregation Network with 6 dilated blocks of 32 channels, 46,890 parameters.
///
/// Dilations 1, 1, 2, 4, 8, 1 give a 35x35 receptive field, so every output position
/// sees the whole 32x32 image before the global average pooling.
pub fn model_config() -> CanConfig {
    CanConfig::new()
        .with_image_size(32)
        .with_channels(32)
        .with_dilations(vec![1, 1, 2, 4, 8, 1])
        .with_negative_slope(0.1)
        .with_num_classes(10)
}

pub fn training_config() -> TrainingConfig {
    TrainingConfig::new(AdamConfig::new())
        .with_num_epochs(5)
        .with_batch_size(64)
        .with_num_workers(2)
        .with_lr(1e-3)
}
// notes:
// - every block runs at full resolution, so this is much slower per epoch than LeNet
// despite having fewer parameters
