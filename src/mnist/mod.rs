mod batcher;
mod dataset;

pub use batcher::{MEAN, MnistBatch, MnistBatcher, STD};
pub use dataset::{HEIGHT, MnistDataset, MnistItem, Split, WIDTH};
