use crate::artifacts::{Artifacts, load_config};
use crate::backend::MainDevice;
use crate::cli::{AppArgs, HELP};
use crate::inference::infer;
use crate::mnist::MnistDataset;
use crate::model::{Classifier, ModelConfigExt};
use crate::training::{TrainingConfig, evaluate, train, valid_dataloader};
use anyhow::{Context, bail, ensure};
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Resolves and persists the configs, then trains and/or runs inference as requested.
///
/// Explicit config files win over the configs stored in the artifacts directory,
/// which win over the defaults.
pub fn launch<B, AutoB, MC>(
    app_args: &AppArgs,
    default_model_config: impl FnOnce() -> MC,
    default_training_config: impl FnOnce() -> TrainingConfig,
) -> anyhow::Result<()>
where
    B: Backend + MainDevice,
    AutoB: AutodiffBackend + MainDevice,
    MC: ModelConfigExt<B> + ModelConfigExt<AutoB>,
    <MC as ModelConfigExt<AutoB>>::Model: AutodiffModule<AutoB>,
    <<MC as ModelConfigExt<AutoB>>::Model as AutodiffModule<AutoB>>::InnerModule:
        Classifier<AutoB::InnerBackend>,
{
    if app_args.help {
        println!("{HELP}");
        return Ok(());
    }

    let artifacts = Artifacts::create(&app_args.artifacts_path)?;

    // setup training and model configs
    let training_config = match &app_args.training_config {
        Some(path) => Some(
            load_config::<TrainingConfig>(path)?.with_context(|| format!("{path:?} not found"))?,
        ),
        None => artifacts.load_training_config()?,
    };
    let training_config = training_config.unwrap_or_else(default_training_config);
    let model_config = match &app_args.model_config {
        Some(path) => {
            Some(load_config::<MC>(path)?.with_context(|| format!("{path:?} not found"))?)
        }
        None => artifacts.load_model_config()?,
    };
    let model_config: MC = model_config.unwrap_or_else(default_model_config);
    ensure!(
        training_config.batch_size > 0,
        "the training config batch_size must be positive"
    );
    let image_size = <MC as ModelConfigExt<B>>::image_size(&model_config);
    artifacts.save_training_config(&training_config)?;
    artifacts.save_model_config(&model_config)?;

    if app_args.training {
        if app_args.remove_artifacts {
            artifacts.remove_checkpoints::<AutoB>()?;
        }

        let device = AutoB::main_device();
        AutoB::seed(&device, training_config.seed);

        let model = artifacts.load_or_init_model::<AutoB, MC>(&model_config, &device)?;
        log::info!("model has {} parameters", model.num_params());
        let optim = training_config
            .optimizer
            .init::<AutoB, <MC as ModelConfigExt<AutoB>>::Model>();
        let optim = artifacts.load_or_init_optim::<AutoB, _, _>(optim, &device)?;

        let (_model, history) = train::<AutoB, _, _, _, _>(
            &training_config,
            image_size,
            model,
            optim,
            MnistDataset::train()?,
            MnistDataset::test()?,
            &artifacts,
        )?;
        if let Some(last) = history.last() {
            log::info!(
                "final test accuracy: {:.2}% ({} images)",
                last.valid.accuracy * 100.,
                last.valid.num_items
            );
        }
    }

    if app_args.inference {
        let device = B::main_device();
        let Some(model) = artifacts.load_model::<B, MC>(&model_config, &device)? else {
            bail!(
                "no trained model in {:?}; run with --training first",
                artifacts.dir
            );
        };

        let dataset = MnistDataset::test()?;
        infer::<B, _, _>(
            &model,
            &dataset,
            app_args.num_samples,
            image_size,
            &device,
        )?;

        let dataloader = valid_dataloader::<B, _>(
            dataset,
            image_size,
            training_config.batch_size,
            training_config.num_workers,
        );
        let report = evaluate(dataloader, &model, None);
        println!(
            "Test Loss {:.4}, Test Accuracy {:.2}% ({} images)",
            report.loss,
            report.accuracy * 100.,
            report.num_items
        );
    }

    if !app_args.inference && !app_args.training {
        println!("neither training nor inference were enabled");
        println!("{HELP}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MainAutoBackend, MainBackend};
    use crate::lenet::LeNetConfig;
    use burn::optim::AdamConfig;
    use std::path::Path;

    fn app_args(artifacts_path: &Path) -> AppArgs {
        AppArgs {
            help: false,
            training: false,
            inference: false,
            remove_artifacts: false,
            training_config: None,
            model_config: None,
            artifacts_path: artifacts_path.to_path_buf(),
            num_samples: 10,
        }
    }

    fn default_training_config() -> TrainingConfig {
        TrainingConfig::new(AdamConfig::new()).with_num_epochs(3)
    }

    fn run(app_args: &AppArgs) -> anyhow::Result<()> {
        launch::<MainBackend, MainAutoBackend, LeNetConfig>(
            app_args,
            LeNetConfig::new,
            default_training_config,
        )
    }

    #[test]
    fn persists_the_default_configs() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts_path = dir.path().join("artifacts");
        run(&app_args(&artifacts_path)).unwrap();

        let artifacts = Artifacts::create(&artifacts_path).unwrap();
        let model_config: LeNetConfig = artifacts.load_model_config().unwrap().unwrap();
        assert_eq!(LeNetConfig::new().hidden_size, model_config.hidden_size);
        let training_config: TrainingConfig = artifacts.load_training_config().unwrap().unwrap();
        assert_eq!(3, training_config.num_epochs);
    }

    #[test]
    fn stored_configs_win_over_the_defaults() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts = Artifacts::create(dir.path()).unwrap();
        artifacts
            .save_model_config(&LeNetConfig::new().with_hidden_size(50))
            .unwrap();
        artifacts
            .save_training_config(&default_training_config().with_num_epochs(7))
            .unwrap();

        run(&app_args(dir.path())).unwrap();

        let model_config: LeNetConfig = artifacts.load_model_config().unwrap().unwrap();
        assert_eq!(50, model_config.hidden_size);
        let training_config: TrainingConfig = artifacts.load_training_config().unwrap().unwrap();
        assert_eq!(7, training_config.num_epochs);
    }

    #[test]
    fn explicit_configs_win_over_the_stored_ones() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts = Artifacts::create(dir.path().join("artifacts")).unwrap();
        artifacts
            .save_model_config(&LeNetConfig::new().with_hidden_size(50))
            .unwrap();
        artifacts
            .save_training_config(&default_training_config().with_num_epochs(7))
            .unwrap();

        let model_path = dir.path().join("model.json");
        LeNetConfig::new()
            .with_hidden_size(20)
            .save(&model_path)
            .unwrap();
        let training_path = dir.path().join("training.json");
        default_training_config()
            .with_num_epochs(2)
            .save(&training_path)
            .unwrap();

        let mut args = app_args(&artifacts.dir);
        args.model_config = Some(model_path);
        args.training_config = Some(training_path);
        run(&args).unwrap();

        let model_config: LeNetConfig = artifacts.load_model_config().unwrap().unwrap();
        assert_eq!(20, model_config.hidden_size);
        let training_config: TrainingConfig = artifacts.load_training_config().unwrap().unwrap();
        assert_eq!(2, training_config.num_epochs);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = temp_dir::TempDir::new().unwrap();
        let mut args = app_args(&dir.path().join("artifacts"));
        args.model_config = Some(dir.path().join("missing.json"));
        assert!(run(&args).is_err());

        let mut args = app_args(&dir.path().join("artifacts"));
        args.training_config = Some(dir.path().join("missing.json"));
        assert!(run(&args).is_err());
    }

    #[test]
    fn rejects_an_empty_batch_size() {
        let dir = temp_dir::TempDir::new().unwrap();
        let training_path = dir.path().join("training.json");
        default_training_config()
            .with_batch_size(0)
            .save(&training_path)
            .unwrap();

        let mut args = app_args(&dir.path().join("artifacts"));
        args.training_config = Some(training_path);
        assert!(run(&args).is_err());
    }

    #[test]
    fn help_skips_the_artifacts() {
        let dir = temp_dir::TempDir::new().unwrap();
        let artifacts_path = dir.path().join("artifacts");
        let mut args = app_args(&artifacts_path);
        args.help = true;
        // help wins even when training is requested
        args.training = true;

        run(&args).unwrap();
        assert!(!artifacts_path.exists());
    }
}
