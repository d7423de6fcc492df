//! Epoch loop: train, validate, schedule, checkpoint

use crate::config::TrainConfig;
use crate::dataset::{DataLoader, ImageFolder, LoaderMode};
use crate::optim::{GroupedAdamW, ParamGroups};
use crate::scaler::GradScaler;
use crate::schedule::CosineAnnealingLr;
use arutala_core::{Error, Result};
use arutala_vision::{is_under_prefix, ModelProvider, TrainableModel};
use candle_core::{DType, Tensor, Var, D};
use candle_nn::{Module, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-epoch metrics, one entry per completed epoch in every sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_accuracy: Vec<f32>,
    /// Learning rate in effect during each epoch
    pub learning_rate: Vec<f64>,
}

impl TrainingResult {
    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Settings the epoch loop needs, independent of where the model came from
#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub use_amp: bool,
    pub model_save_dir: PathBuf,
    /// Only parameters under this prefix are optimized
    pub trainable_prefix: Option<String>,
}

impl TrainerOptions {
    pub fn from_config(config: &TrainConfig, head_prefix: &str) -> Self {
        Self {
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            use_amp: config.use_amp,
            model_save_dir: config.model_save_dir.clone(),
            trainable_prefix: config.freeze_backbone.then(|| head_prefix.to_string()),
        }
    }
}

/// Drives a model whose parameters live in `varmap` through a fixed number of epochs
pub struct Trainer<M: Module> {
    model: M,
    varmap: VarMap,
    trainable: Vec<Var>,
    optimizer: GroupedAdamW,
    scheduler: CosineAnnealingLr,
    scaler: GradScaler,
    epochs: usize,
    model_save_dir: PathBuf,
}

impl<M: Module> Trainer<M> {
    pub fn new(model: M, varmap: VarMap, options: TrainerOptions) -> Result<Self> {
        let groups = match &options.trainable_prefix {
            Some(prefix) => ParamGroups::partition(&varmap, |name| is_under_prefix(name, prefix))?,
            None => ParamGroups::partition(&varmap, |_| true)?,
        };
        if groups.is_empty() {
            return Err(Error::config("No trainable parameters"));
        }

        info!(
            decay = groups.decay.len(),
            no_decay = groups.no_decay.len(),
            parameters = groups.parameter_count(),
            "Parameter groups built"
        );

        let optimizer = GroupedAdamW::new(&groups, options.learning_rate, options.weight_decay)?;
        let scaler = if options.use_amp {
            GradScaler::default()
        } else {
            GradScaler::disabled()
        };

        Ok(Self {
            model,
            varmap,
            trainable: groups.vars(),
            optimizer,
            scheduler: CosineAnnealingLr::new(options.learning_rate, options.epochs),
            scaler,
            epochs: options.epochs,
            model_save_dir: options.model_save_dir,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn scaler(&self) -> &GradScaler {
        &self.scaler
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Run every epoch, saving a checkpoint after each
    pub fn fit<R: Rng>(
        &mut self,
        train: &DataLoader<'_>,
        val: &DataLoader<'_>,
        rng: &mut R,
    ) -> Result<TrainingResult> {
        fs::create_dir_all(&self.model_save_dir)?;
        let mut result = TrainingResult::default();

        for epoch in 0..self.epochs {
            let lr = self.optimizer.learning_rate();
            info!("Epoch: {} | lr: {:.3e}", epoch + 1, lr);
            result.learning_rate.push(lr);

            let start = Instant::now();
            let train_loss = self.train_step(train, rng)?;
            result.train_loss.push(train_loss);

            let (val_loss, val_accuracy) = self.val_step(val, rng)?;
            result.val_loss.push(val_loss);
            result.val_accuracy.push(val_accuracy);

            let next_lr = self.scheduler.step();
            self.optimizer.set_learning_rate(next_lr);

            let checkpoint = self.save_checkpoint(epoch)?;
            info!(
                train_loss,
                val_loss,
                val_accuracy,
                elapsed_ms = start.elapsed().as_millis() as u64,
                checkpoint = %checkpoint.display(),
                "Epoch {} complete",
                epoch + 1
            );
        }

        Ok(result)
    }

    /// One pass over the training data; returns the mean batch loss
    pub fn train_step<R: Rng>(&mut self, loader: &DataLoader<'_>, rng: &mut R) -> Result<f32> {
        let batches = loader.batch_indices(rng);
        let total_batches = batches.len();
        let mut total_loss = 0.0f32;

        for (i, indices) in batches.iter().enumerate() {
            let batch = loader.load_batch(indices, rng)?;
            let logits = self.model.forward(&batch.images)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)?;

            let mut grads = self.scaler.scale_loss(&loss)?.backward()?;
            let found_inf = self.scaler.unscale(&mut grads, &self.trainable)?;
            if found_inf {
                warn!(
                    batch = i + 1,
                    scale = self.scaler.scale(),
                    "Skipping step with non-finite gradients"
                );
            } else {
                self.optimizer.step(&grads)?;
            }
            self.scaler.update(found_inf);

            total_loss += scalar(&loss)?;
            debug!(
                "Training {}/{} | loss: {:.4}",
                i + 1,
                total_batches,
                total_loss / (i + 1) as f32
            );
        }

        Ok(total_loss / total_batches.max(1) as f32)
    }

    /// One pass over the validation data without updates; returns mean loss and accuracy
    pub fn val_step<R: Rng>(&self, loader: &DataLoader<'_>, rng: &mut R) -> Result<(f32, f32)> {
        let batches = loader.batch_indices(rng);
        let total_batches = batches.len();
        let mut total_loss = 0.0f32;
        let mut total_acc = 0.0f32;

        for (i, indices) in batches.iter().enumerate() {
            let batch = loader.load_batch(indices, rng)?;
            let logits = self.model.forward(&batch.images)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)?;

            let predicted = logits.argmax(D::Minus1)?;
            let accuracy = predicted.eq(&batch.labels)?.to_dtype(DType::F32)?.mean_all()?;

            total_loss += scalar(&loss)?;
            total_acc += scalar(&accuracy)?;
            debug!(
                "Validation {}/{} | loss: {:.4} | acc: {:.4}",
                i + 1,
                total_batches,
                total_loss / (i + 1) as f32,
                total_acc / (i + 1) as f32
            );
        }

        let n = total_batches.max(1) as f32;
        Ok((total_loss / n, total_acc / n))
    }

    /// Write every parameter to `model-{epoch}.safetensors`
    pub fn save_checkpoint(&self, epoch: usize) -> Result<PathBuf> {
        let path = self.model_save_dir.join(format!("model-{}.safetensors", epoch));
        self.varmap
            .save(&path)
            .map_err(|e| Error::checkpoint(format!("Failed to write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Checkpoint saved");
        Ok(path)
    }
}

impl Trainer<TrainableModel> {
    /// Train a hub model, freezing everything outside its head when configured
    pub fn from_trainable(model: TrainableModel, config: &TrainConfig) -> Result<Self> {
        let varmap = model.varmap().clone();
        let options = TrainerOptions::from_config(config, model.head_prefix());
        Self::new(model, varmap, options)
    }
}

fn scalar(t: &Tensor) -> Result<f32> {
    Ok(t.to_dtype(DType::F32)?.to_scalar::<f32>()?)
}

/// Full run: datasets, model, epoch loop
pub fn run(config: &TrainConfig) -> Result<TrainingResult> {
    config.validate()?;

    let train_data = ImageFolder::open(&config.train_dir)?;
    let val_data = ImageFolder::open_with_classes(&config.val_dir, train_data.classes())?;
    info!(
        classes = train_data.classes().len(),
        train = train_data.len(),
        val = val_data.len(),
        "Datasets loaded"
    );

    let mut provider = ModelProvider::new();
    if let Some(dir) = &config.cache_dir {
        provider = provider.with_cache_dir(dir.clone());
    }
    let model =
        provider.load_trainable(&config.model_path, train_data.classes().len(), config.device)?;
    info!(parameters = model.parameter_count(), "Model ready");

    let transform = model.transform().clone();
    let device = model.device().clone();
    let train_loader = DataLoader::new(
        &train_data,
        &transform,
        config.batch_size,
        LoaderMode::Train,
        &device,
    );
    let val_loader =
        DataLoader::new(&val_data, &transform, config.batch_size, LoaderMode::Eval, &device);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut trainer = Trainer::from_trainable(model, config)?;
    trainer.fit(&train_loader, &val_loader, &mut rng)
}
