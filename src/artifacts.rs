//! Persistence of configurations, checkpoints and training history.

use crate::backend::RecorderTy;
use crate::model::ModelConfigExt;
use crate::training::EpochReport;
use anyhow::{Context, anyhow};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::record::{FileRecorder, Recorder};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use std::path::{Path, PathBuf};

pub const TRAINING_CONFIG_NAME: &str = "training_config";
pub const MODEL_CONFIG_NAME: &str = "model_config";
pub const MODEL_NAME: &str = "model";
pub const OPTIM_NAME: &str = "optim";
pub const HISTORY_NAME: &str = "history";

/// Directory where configurations, model weights, optimizer state and history are kept.
#[derive(Clone, Debug)]
pub struct Artifacts {
    pub dir: PathBuf,
}

impl Artifacts {
    /// Creates the directory if missing.
    pub fn create(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir:?}"))?;
        Ok(Self { dir })
    }

    pub fn training_config_path(&self) -> PathBuf {
        self.dir.join(TRAINING_CONFIG_NAME).with_extension("json")
    }

    pub fn model_config_path(&self) -> PathBuf {
        self.dir.join(MODEL_CONFIG_NAME).with_extension("json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_NAME).with_extension("json")
    }

    /// Path of the model record, extension included.
    pub fn model_path<B: Backend>(&self) -> PathBuf {
        record_path::<B>(&self.dir, MODEL_NAME)
    }

    /// Path of the optimizer record, extension included.
    pub fn optim_path<B: Backend>(&self) -> PathBuf {
        record_path::<B>(&self.dir, OPTIM_NAME)
    }

    /// Deletes the model and optimizer records and the history, if present.
    pub fn remove_checkpoints<B: Backend>(&self) -> anyhow::Result<()> {
        for path in [
            self.model_path::<B>(),
            self.optim_path::<B>(),
            self.history_path(),
        ] {
            if std::fs::exists(&path).with_context(|| format!("failed to check {path:?}"))? {
                log::info!("removing {path:?}");
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {path:?}"))?;
            }
        }
        Ok(())
    }

    pub fn save_training_config<C: Config>(&self, training_config: &C) -> anyhow::Result<()> {
        save_config(&self.training_config_path(), training_config)
    }

    pub fn load_training_config<TrainingConfig: Config>(
        &self,
    ) -> anyhow::Result<Option<TrainingConfig>> {
        load_config(&self.training_config_path())
    }

    pub fn save_model_config<C: Config>(&self, model_config: &C) -> anyhow::Result<()> {
        save_config(&self.model_config_path(), model_config)
    }

    pub fn load_model_config<ModelConfig: Config>(&self) -> anyhow::Result<Option<ModelConfig>> {
        load_config(&self.model_config_path())
    }

    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M) -> anyhow::Result<()> {
        let path = self.model_path::<B>();
        log::debug!("saving model to {path:?}");
        model
            .clone()
            .save_file(self.dir.join(MODEL_NAME), &RecorderTy::new()) // ext added automatically
            .map_err(|err| anyhow!("failed to save the model to {path:?}: {err:?}"))
    }

    pub fn load_model<B: Backend, ModelConfig: ModelConfigExt<B>>(
        &self,
        model_config: &ModelConfig,
        device: &B::Device,
    ) -> anyhow::Result<Option<ModelConfig::Model>> {
        let path = self.model_path::<B>();
        if !std::fs::exists(&path).with_context(|| format!("failed to check {path:?}"))? {
            return Ok(None);
        }
        log::info!("loading model from {path:?}");
        let model = model_config
            .init(device)
            .load_file(self.dir.join(MODEL_NAME), &RecorderTy::new(), device)
            .map_err(|err| anyhow!("failed to load the model from {path:?}: {err:?}"))?;
        Ok(Some(model))
    }

    /// Loads the model record, or initializes (and saves) a new model.
    pub fn load_or_init_model<B: Backend, ModelConfig: ModelConfigExt<B>>(
        &self,
        model_config: &ModelConfig,
        device: &B::Device,
    ) -> anyhow::Result<ModelConfig::Model> {
        match self.load_model(model_config, device)? {
            Some(model) => Ok(model),
            None => {
                log::info!("initializing a new model");
                let model = model_config.init(device);
                self.save_model::<B, _>(&model)?;
                Ok(model)
            }
        }
    }

    pub fn save_optim<AutoB, AutoM, Optim>(&self, optim: &Optim) -> anyhow::Result<()>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
        Optim: Optimizer<AutoM, AutoB>,
    {
        let path = self.optim_path::<AutoB>();
        log::debug!("saving optim to {path:?}");
        let record = optim.to_record();
        Recorder::<AutoB>::record(&RecorderTy::new(), record, self.dir.join(OPTIM_NAME))
            .map_err(|err| anyhow!("failed to save the optim to {path:?}: {err:?}"))
    }

    /// Restores the optimizer state into `optim` when a record exists.
    ///
    /// Returns whether a record was found.
    pub fn load_optim<AutoB, AutoM, Optim>(
        &self,
        optim: Optim,
        device: &AutoB::Device,
    ) -> anyhow::Result<(Optim, bool)>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
        Optim: Optimizer<AutoM, AutoB>,
    {
        let path = self.optim_path::<AutoB>();
        if !std::fs::exists(&path).with_context(|| format!("failed to check {path:?}"))? {
            return Ok((optim, false));
        }
        log::info!("loading optim from {path:?}");
        let record = Recorder::<AutoB>::load(&RecorderTy::new(), self.dir.join(OPTIM_NAME), device)
            .map_err(|err| anyhow!("failed to load the optim from {path:?}: {err:?}"))?;
        Ok((optim.load_record(record), true))
    }

    /// Loads the optimizer record into `optim`, or saves its fresh state.
    pub fn load_or_init_optim<AutoB, AutoM, Optim>(
        &self,
        optim: Optim,
        device: &AutoB::Device,
    ) -> anyhow::Result<Optim>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
        Optim: Optimizer<AutoM, AutoB>,
    {
        let (optim, loaded) = self.load_optim(optim, device)?;
        if !loaded {
            log::info!("initializing a new optim");
            self.save_optim::<AutoB, AutoM, _>(&optim)?;
        }
        Ok(optim)
    }

    pub fn save_history(&self, history: &[EpochReport]) -> anyhow::Result<()> {
        let path = self.history_path();
        let json = serde_json::to_string_pretty(history)?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {path:?}"))
    }

    pub fn load_history(&self) -> anyhow::Result<Vec<EpochReport>> {
        let path = self.history_path();
        if !std::fs::exists(&path).with_context(|| format!("failed to check {path:?}"))? {
            return Ok(vec![]);
        }
        let json = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
        serde_json::from_str(&json).with_context(|| format!("invalid history in {path:?}"))
    }
}

fn record_path<B: Backend>(dir: &Path, name: &str) -> PathBuf {
    let file_ext = <RecorderTy as FileRecorder<B>>::file_extension();
    dir.join(name).with_extension(file_ext)
}

pub fn save_config(path: &Path, config: &impl Config) -> anyhow::Result<()> {
    log::info!("saving config into {path:?}");
    config
        .save(path)
        .with_context(|| format!("failed to save the config into {path:?}"))
}

pub fn load_config<C: Config>(path: &Path) -> anyhow::Result<Option<C>> {
    if !std::fs::exists(path).with_context(|| format!("failed to check {path:?}"))? {
        return Ok(None);
    }
    log::info!("loading config from {path:?}");
    let config = C::load(path).map_err(|err| anyhow!("failed to load {path:?}: {err:?}"))?;
    Ok(Some(config))
}
