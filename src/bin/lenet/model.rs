use burn::optim::AdamConfig;
use burn_mnist_nets::prelude::*;

/// Modified LeNet-5 over 32x32 resized digits, 61,706 parameters.
pub fn model_config() -> LeNetConfig {
    LeNetConfig::new()
        // the 28x28 digits are resized by the batcher
        .with_image_size(32)
        // 6 -> 16 -> 120 feature maps, as in the original architecture
        .with_conv1_channels(6)
        .with_conv2_channels(16)
        .with_conv3_channels(120)
        .with_hidden_size(84)
        .with_num_classes(10)
}

pub fn training_config() -> TrainingConfig {
    TrainingConfig::new(AdamConfig::new())
        .with_num_epochs(10)
        .with_batch_size(64)
        .with_num_workers(2)
        .with_lr(1e-3)
}
