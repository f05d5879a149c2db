use crate::mnist::{MnistBatch, MnistBatcher, MnistItem};
use crate::model::Classifier;
use anyhow::anyhow;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::tensor::activation::softmax;

/// Model guess for a single image.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub label: u8,
    pub predicted: u8,
    /// Softmax probability of the predicted class.
    pub confidence: f32,
}

/// Classifies the first `num_samples` items of `dataset` in a single batch.
pub fn infer<B: Backend, M: Classifier<B>, D: Dataset<MnistItem>>(
    model: &M,
    dataset: &D,
    num_samples: usize,
    image_size: usize,
    device: &B::Device,
) -> anyhow::Result<Vec<Prediction>> {
    let items: Vec<MnistItem> = dataset.iter().take(num_samples).collect();
    if items.is_empty() {
        return Ok(vec![]);
    }

    let batcher = MnistBatcher::new(image_size);
    let batch: MnistBatch<B> = Batcher::<B, _, _>::batch(&batcher, items, device);
    let labels = batch
        .targets
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| anyhow!("failed to read the labels: {err:?}"))?;

    let probabilities = softmax(model.logits(batch.images), 1);
    let (confidences, predicted) = probabilities.max_dim_with_indices(1);
    let confidences = confidences
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("failed to read the confidences: {err:?}"))?;
    let predicted = predicted
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| anyhow!("failed to read the predictions: {err:?}"))?;

    let predictions: Vec<Prediction> = labels
        .into_iter()
        .zip(predicted)
        .zip(confidences)
        .map(|((label, predicted), confidence)| Prediction {
            label: label as u8,
            predicted: predicted as u8,
            confidence,
        })
        .collect();

    log::info!("predicted/expected:");
    for prediction in predictions.iter() {
        log::info!(
            "- {}/{} ({:.1}%){}",
            prediction.predicted,
            prediction.label,
            prediction.confidence * 100.,
            if prediction.predicted == prediction.label {
                ""
            } else {
                " wrong"
            }
        );
    }

    Ok(predictions)
}
