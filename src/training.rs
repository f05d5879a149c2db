use crate::artifacts::Artifacts;
use crate::mnist::{MnistBatch, MnistBatcher, MnistItem};
use crate::model::{Classifier, accuracy};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder, Progress};
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{
    AccuracyMetric, Adaptor, LossMetric, Metric, MetricMetadata, Numeric,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 42)]
    pub seed: u64,
    /// Number of training batches between checkpoints and partial validations.
    #[config(default = 200)]
    pub checkpoint_every: usize,
    /// Number of validation batches used by the partial validations.
    #[config(default = "Some(10)")]
    pub valid_batch_limit: Option<usize>,
}

/// Loss and accuracy over a validation run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EvalReport {
    pub loss: f64,
    /// In between 0.0 and 1.0.
    pub accuracy: f64,
    pub num_items: usize,
}

/// Averaged metrics of one training epoch and the validation that followed it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    /// In between 0.0 and 1.0.
    pub train_accuracy: f64,
    pub valid: EvalReport,
}

pub type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

/// Trains `model` for `training_config.num_epochs` epochs, checkpointing into `artifacts`.
///
/// The images are resized to `image_size`, which must match the model's input side.
/// Epochs continue the numbering of the history already stored in `artifacts`.
/// Returns the trained model along with the whole history, previous epochs included.
pub fn train<AutoB, M, O, DTrain, DValid>(
    training_config: &TrainingConfig,
    image_size: usize,
    model: M,
    mut optim: O,
    dataset_train: DTrain,
    dataset_valid: DValid,
    artifacts: &Artifacts,
) -> anyhow::Result<(M, Vec<EpochReport>)>
where
    AutoB: AutodiffBackend,
    M: AutodiffModule<AutoB> + Classifier<AutoB>,
    M::InnerModule: Classifier<AutoB::InnerBackend>,
    O: Optimizer<M, AutoB>,
    DTrain: Dataset<MnistItem> + 'static,
    DValid: Dataset<MnistItem> + 'static,
{
    let batcher = MnistBatcher::new(image_size);

    let dataloader_train: Dataloader<AutoB> = DataLoaderBuilder::new(batcher.clone())
        .batch_size(training_config.batch_size)
        .shuffle(training_config.seed)
        .num_workers(training_config.num_workers)
        .build(dataset_train);
    let dataloader_valid: Dataloader<AutoB::InnerBackend> = DataLoaderBuilder::new(batcher)
        .batch_size(training_config.batch_size)
        .num_workers(training_config.num_workers)
        .build(dataset_valid);

    let training_num_items = dataloader_train.num_items();
    log::info!(
        "training on {training_num_items} items, validating on {} items",
        dataloader_valid.num_items()
    );

    let mut history = artifacts.load_history()?;
    let first_epoch = history.last().map_or(1, |report| report.epoch + 1);
    let last_epoch = first_epoch + training_config.num_epochs - 1;
    if first_epoch > 1 {
        log::info!("resuming after epoch {}", first_epoch - 1);
    }

    let mut metric_meta = MetricMetadata {
        progress: Progress::new(0, training_num_items),
        epoch: first_epoch,
        epoch_total: last_epoch,
        iteration: 0,
        lr: Some(training_config.lr),
    };

    log::info!("running small initial validation...");
    evaluate::<AutoB::InnerBackend, _>(
        Arc::clone(&dataloader_valid),
        &model.valid(),
        training_config.valid_batch_limit,
    );

    let mut model = model;

    log::info!("starting training...");
    for epoch in first_epoch..=last_epoch {
        metric_meta.epoch = epoch;
        metric_meta.progress = Progress::new(0, training_num_items);

        let (trained, train_loss, train_accuracy) = epoch_train::<AutoB, _, _>(
            Arc::clone(&dataloader_train),
            Arc::clone(&dataloader_valid),
            model,
            &mut optim,
            training_config,
            &mut metric_meta,
            artifacts,
        )?;
        model = trained;

        artifacts.save_model::<AutoB, _>(&model)?;
        artifacts.save_optim::<AutoB, M, _>(&optim)?;

        log::info!("running full validation...");
        let valid = evaluate::<AutoB::InnerBackend, _>(
            Arc::clone(&dataloader_valid),
            &model.valid(),
            None,
        );
        log::info!(
            "Epoch {epoch}/{last_epoch}, Avg Valid Loss {:.4}, Valid Acc {:.2}%",
            valid.loss,
            valid.accuracy * 100.,
        );

        history.push(EpochReport {
            epoch,
            train_loss,
            train_accuracy,
            valid,
        });
        artifacts.save_history(&history)?;
    }
    log::info!("training finished");

    Ok((model, history))
}

/// Runs one pass over the training data.
///
/// Returns the updated model with its averaged loss and accuracy (0.0 to 1.0).
pub fn epoch_train<AutoB, M, O>(
    dataloader_train: Dataloader<AutoB>,
    dataloader_valid: Dataloader<AutoB::InnerBackend>,
    mut model: M,
    optim: &mut O,
    training_config: &TrainingConfig,
    metric_meta: &mut MetricMetadata,
    artifacts: &Artifacts,
) -> anyhow::Result<(M, f64, f64)>
where
    AutoB: AutodiffBackend,
    M: AutodiffModule<AutoB> + Classifier<AutoB>,
    M::InnerModule: Classifier<AutoB::InnerBackend>,
    O: Optimizer<M, AutoB>,
{
    let mut loss_metric = LossMetric::<AutoB>::new();
    let mut acc_metric = AccuracyMetric::<AutoB>::new();
    let num_batches = dataloader_train
        .num_items()
        .div_ceil(training_config.batch_size);

    for (mut b, batch) in dataloader_train.iter().enumerate() {
        b += 1;
        let [batch_size, _channels, _height, _width] = batch.images.dims();

        metric_meta.iteration += 1;
        metric_meta.progress.items_processed += batch_size;

        let output = model.forward_classification(batch.images, batch.targets);
        acc_metric.update(&output.adapt(), metric_meta);
        loss_metric.update(&output.adapt(), metric_meta);

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(training_config.lr, model, grads);

        log::debug!(
            "Epoch {}/{}, Batch {b:0>4}/{num_batches}, Loss {:.4}, Acc {:0>6.2}",
            metric_meta.epoch,
            metric_meta.epoch_total,
            loss_metric.value().current(),
            acc_metric.value().current(),
        );

        if training_config.checkpoint_every > 0 && b % training_config.checkpoint_every == 0 {
            log::info!(
                "Epoch {}/{}, Batch {b:0>4}/{num_batches}, Running Loss {:.4}, Running Acc {:0>6.2}",
                metric_meta.epoch,
                metric_meta.epoch_total,
                loss_metric.running_value().current(),
                acc_metric.running_value().current(),
            );
            artifacts.save_model::<AutoB, _>(&model)?;
            artifacts.save_optim::<AutoB, M, _>(&*optim)?;

            let report = evaluate::<AutoB::InnerBackend, _>(
                Arc::clone(&dataloader_valid),
                &model.valid(),
                training_config.valid_batch_limit,
            );
            log::info!(
                "partial validation over {} items: Loss {:.4}, Acc {:.2}%",
                report.num_items,
                report.loss,
                report.accuracy * 100.
            );
        }
    }

    // the burn accuracy metric is a percentage
    let train_loss = loss_metric.running_value().current();
    let train_accuracy = acc_metric.running_value().current() / 100.;
    log::info!(
        "Epoch {}/{}, Avg Loss {:.4}, Avg Acc {:.2}%",
        metric_meta.epoch,
        metric_meta.epoch_total,
        train_loss,
        train_accuracy * 100.,
    );

    Ok((model, train_loss, train_accuracy))
}

/// Validation loop: averages the loss and counts correct predictions.
///
/// `batch_limit` restricts the run to the first batches.
pub fn evaluate<B: Backend, M: Classifier<B>>(
    dataloader_valid: Dataloader<B>,
    model: &M,
    batch_limit: Option<usize>,
) -> EvalReport {
    let batch_limit = batch_limit.unwrap_or(usize::MAX);

    let mut loss_sum = 0.;
    let mut correct = 0;
    let mut num_items = 0;
    for batch in dataloader_valid.iter().take(batch_limit) {
        let output = model.forward_classification(batch.images, batch.targets);
        let (batch_correct, batch_size) = accuracy(output.output, output.targets);
        // the loss is a batch mean
        loss_sum += output.loss.into_scalar().elem::<f64>() * batch_size as f64;
        correct += batch_correct;
        num_items += batch_size;
    }

    if num_items == 0 {
        log::warn!("validation ran over no items");
        return EvalReport {
            loss: 0.,
            accuracy: 0.,
            num_items,
        };
    }

    EvalReport {
        loss: loss_sum / num_items as f64,
        accuracy: correct as f64 / num_items as f64,
        num_items,
    }
}

/// Builds a validation dataloader over `dataset`.
pub fn valid_dataloader<B: Backend, D: Dataset<MnistItem> + 'static>(
    dataset: D,
    image_size: usize,
    batch_size: usize,
    num_workers: usize,
) -> Dataloader<B> {
    DataLoaderBuilder::new(MnistBatcher::new(image_size))
        .batch_size(batch_size)
        .num_workers(num_workers)
        .build(dataset)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::Element;
    use crate::can::CanConfig;
    use crate::lenet::{LeNet, LeNetConfig};
    use crate::mnist::{HEIGHT, MnistDataset, WIDTH};
    use crate::model::ModelConfigExt;
    use burn::backend::{Autodiff, NdArray};
    use num_traits::AsPrimitive;

    type TestBackend = NdArray<f32, i32>;
    type TestAutoBackend = Autodiff<TestBackend>;

    /// Digits drawn as a bright horizontal band whose row depends on the label.
    pub fn synthetic_items(count: usize) -> Vec<MnistItem> {
        (0..count)
            .map(|i| {
                let label = (i % 10) as u8;
                let row = 2 + 2 * label as usize;
                let image = (0..HEIGHT * WIDTH)
                    .map(|p| {
                        let bright = p / WIDTH == row || p / WIDTH == row + 1;
                        let brightness: u8 = if bright { 255 } else { 0 };
                        let element: Element = brightness.as_();
                        element
                    })
                    .collect();
                MnistItem { image, label }
            })
            .collect()
    }

    fn training_config() -> TrainingConfig {
        TrainingConfig::new(AdamConfig::new())
            .with_num_epochs(1)
            .with_batch_size(8)
            .with_num_workers(1)
            .with_checkpoint_every(2)
            .with_valid_batch_limit(Some(1))
    }

    #[test]
    fn trains_lenet_one_epoch() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts = Artifacts::create(dir.path()).unwrap();
        let device = Default::default();
        TestAutoBackend::seed(&device, 0);

        let config = training_config();
        let model: LeNet<TestAutoBackend> = LeNetConfig::new().init(&device);
        let optim = config
            .optimizer
            .init::<TestAutoBackend, LeNet<TestAutoBackend>>();

        let (_model, history) = train(
            &config,
            32,
            model,
            optim,
            MnistDataset::from_items(synthetic_items(20)),
            MnistDataset::from_items(synthetic_items(10)),
            &artifacts,
        )
        .unwrap();

        assert_eq!(1, history.len());
        let report = &history[0];
        assert_eq!(1, report.epoch);
        assert_eq!(10, report.valid.num_items);
        assert!((0.0..=1.0).contains(&report.valid.accuracy));
        assert!((0.0..=1.0).contains(&report.train_accuracy));
        assert!(report.train_loss.is_finite());

        assert!(artifacts.model_path::<TestAutoBackend>().exists());
        assert!(artifacts.optim_path::<TestAutoBackend>().exists());
        let stored = artifacts.load_history().unwrap();
        assert_eq!(1, stored.len());
        assert_eq!(10, stored[0].valid.num_items);
    }

    #[test]
    fn resumed_training_extends_the_history() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts = Artifacts::create(dir.path()).unwrap();
        let device = Default::default();
        TestAutoBackend::seed(&device, 0);

        let config = training_config();
        let mut model: LeNet<TestAutoBackend> = LeNetConfig::new().init(&device);
        for run in 1..=2 {
            let optim = config
                .optimizer
                .init::<TestAutoBackend, LeNet<TestAutoBackend>>();
            let (trained, history) = train(
                &config,
                32,
                model,
                optim,
                MnistDataset::from_items(synthetic_items(8)),
                MnistDataset::from_items(synthetic_items(4)),
                &artifacts,
            )
            .unwrap();
            model = trained;

            assert_eq!(run, history.len());
            assert_eq!(run, history[run - 1].epoch);
        }

        let epochs: Vec<usize> = artifacts
            .load_history()
            .unwrap()
            .iter()
            .map(|report| report.epoch)
            .collect();
        assert_eq!(vec![1, 2], epochs);
    }

    #[test]
    fn trains_at_the_model_image_size() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts = Artifacts::create(dir.path()).unwrap();
        let device = Default::default();

        let model_config = LeNetConfig::new().with_image_size(44);
        let image_size = ModelConfigExt::<TestAutoBackend>::image_size(&model_config);
        assert_eq!(44, image_size);

        let config = training_config();
        let model: LeNet<TestAutoBackend> = model_config.init(&device);
        let optim = config
            .optimizer
            .init::<TestAutoBackend, LeNet<TestAutoBackend>>();
        let (model, history) = train(
            &config,
            image_size,
            model,
            optim,
            MnistDataset::from_items(synthetic_items(8)),
            MnistDataset::from_items(synthetic_items(4)),
            &artifacts,
        )
        .unwrap();
        assert_eq!(4, history[0].valid.num_items);

        let dataloader = valid_dataloader::<TestBackend, _>(
            MnistDataset::from_items(synthetic_items(3)),
            image_size,
            3,
            1,
        );
        assert_eq!(3, evaluate(dataloader, &model.valid(), None).num_items);
    }

    #[test]
    fn can_loss_decreases_on_a_repeated_batch() {
        let device = Default::default();
        TestAutoBackend::seed(&device, 0);

        let mut model = CanConfig::new()
            .with_channels(8)
            .with_dilations(vec![1, 2, 4])
            .init::<TestAutoBackend>(&device);
        let mut optim = AdamConfig::new().init::<TestAutoBackend, crate::can::Can<TestAutoBackend>>();

        let batch: MnistBatch<TestAutoBackend> = burn::data::dataloader::batcher::Batcher::batch(
            &MnistBatcher::new(32),
            synthetic_items(10),
            &device,
        );

        let loss_of = |model: &crate::can::Can<TestAutoBackend>| {
            model
                .forward_classification(batch.images.clone(), batch.targets.clone())
                .loss
                .into_scalar()
                .elem::<f64>()
        };

        let initial = loss_of(&model);
        for _ in 0..20 {
            let output = model.forward_classification(batch.images.clone(), batch.targets.clone());
            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(1e-2, model, grads);
        }
        assert!(loss_of(&model) < initial);
    }

    #[test]
    fn evaluates_with_a_batch_limit() {
        let device = Default::default();
        let model: LeNet<TestBackend> = LeNetConfig::new().init(&device);
        let items = MnistDataset::from_items(synthetic_items(12));
        let dataloader = valid_dataloader::<TestBackend, _>(items, 32, 5, 1);

        let full = evaluate(Arc::clone(&dataloader), &model, None);
        assert_eq!(12, full.num_items);
        assert!(full.loss > 0.);
        assert!((0.0..=1.0).contains(&full.accuracy));

        let partial = evaluate(dataloader, &model, Some(1));
        assert_eq!(5, partial.num_items);
    }
}
