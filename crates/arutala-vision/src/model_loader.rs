//! Model resolution and loading for Candle-based ConvNeXt classifiers

use crate::classifier::LoadedModel;
use crate::model_config::{ConvNextVariant, HubModelConfig};
use crate::trainable::{pretrained_count, pretrained_var_builder, TrainableModel};
use crate::transform::Transform;
use arutala_core::{Error, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::convnext;
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const HF_HUB_PREFIX: &str = "hf_hub:";

/// Source location for model weights
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Directory holding `config.json` and `model.safetensors`
    LocalPath(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
    },
}

impl ModelSource {
    /// Interpret a model identifier.
    ///
    /// Accepts `hf_hub:<org>/<repo>`, `<org>/<repo>`, either with an optional
    /// `@<revision>` suffix, or a path to an existing local directory.
    pub fn parse(identifier: &str) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::config("Model identifier is empty"));
        }

        if let Some(repo) = identifier.strip_prefix(HF_HUB_PREFIX) {
            return Self::hub(repo);
        }

        let path = Path::new(identifier);
        if path.is_dir() {
            return Ok(Self::LocalPath(path.to_path_buf()));
        }

        Self::hub(identifier)
    }

    fn hub(id: &str) -> Result<Self> {
        let (repo_id, revision) = match id.split_once('@') {
            Some((repo, rev)) if !rev.is_empty() => (repo, Some(rev.to_string())),
            Some((repo, _)) => (repo, None),
            None => (id, None),
        };

        if repo_id.is_empty() || repo_id.starts_with('/') || repo_id.ends_with('/') {
            return Err(Error::config(format!("Invalid hub repository id: '{}'", id)));
        }

        Ok(Self::HuggingFace {
            repo_id: repo_id.to_string(),
            revision,
        })
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalPath(path) => write!(f, "{}", path.display()),
            Self::HuggingFace {
                repo_id,
                revision: Some(rev),
            } => write!(f, "{}{}@{}", HF_HUB_PREFIX, repo_id, rev),
            Self::HuggingFace { repo_id, .. } => write!(f, "{}{}", HF_HUB_PREFIX, repo_id),
        }
    }
}

/// Device type for inference and training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceType {
    /// CPU (always available)
    #[default]
    Cpu,
    /// CUDA GPU by index
    Cuda(usize),
    /// Metal (Apple Silicon) by index
    Metal(usize),
}

impl DeviceType {
    /// Create the Candle device
    pub fn create(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(idx) => Device::new_cuda(idx)
                .map_err(|e| Error::config(format!("Failed to create CUDA device {}: {}", idx, e))),
            Self::Metal(idx) => Device::new_metal(idx)
                .map_err(|e| Error::config(format!("Failed to create Metal device {}: {}", idx, e))),
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        let (kind, index) = match lower.split_once(':') {
            Some((kind, idx)) => {
                let idx = idx
                    .parse::<usize>()
                    .map_err(|_| Error::config(format!("Invalid device index in '{}'", s)))?;
                (kind, idx)
            }
            None => (lower.as_str(), 0),
        };

        match kind {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(index)),
            "metal" | "mps" => Ok(Self::Metal(index)),
            _ => Err(Error::config(format!("Unknown device: '{}'", s))),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{}", idx),
            Self::Metal(idx) => write!(f, "metal:{}", idx),
        }
    }
}

impl TryFrom<String> for DeviceType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceType> for String {
    fn from(device: DeviceType) -> Self {
        device.to_string()
    }
}

/// Local paths of a resolved model
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Resolves model identifiers and builds classifiers from them
#[derive(Debug, Clone, Default)]
pub struct ModelProvider {
    cache_dir: Option<PathBuf>,
    token: Option<String>,
}

impl ModelProvider {
    /// Create a provider using the default hub cache and `HF_TOKEN` if set
    pub fn new() -> Self {
        Self {
            cache_dir: None,
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    /// Override the hub cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the hub access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Locate `config.json` and `model.safetensors`, downloading if not cached
    pub fn resolve(&self, source: &ModelSource) -> Result<ModelFiles> {
        match source {
            ModelSource::LocalPath(dir) => {
                let files = ModelFiles {
                    config: dir.join(CONFIG_FILE),
                    weights: dir.join(WEIGHTS_FILE),
                };
                for path in [&files.config, &files.weights] {
                    if !path.exists() {
                        return Err(Error::hub(format!("Model file not found: {}", path.display())));
                    }
                }
                Ok(files)
            }
            ModelSource::HuggingFace { repo_id, revision } => {
                let mut builder = ApiBuilder::new().with_token(self.token.clone());
                if let Some(dir) = &self.cache_dir {
                    builder = builder.with_cache_dir(dir.clone());
                }
                let api = builder
                    .build()
                    .map_err(|e| Error::hub(format!("Failed to initialize HF API: {}", e)))?;

                let repo = api.repo(Repo::with_revision(
                    repo_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or_else(|| "main".to_string()),
                ));

                let fetch = |filename: &str| {
                    debug!("Fetching {} from {}", filename, repo_id);
                    repo.get(filename).map_err(|e| {
                        Error::hub(format!("Failed to download {} from {}: {}", filename, repo_id, e))
                    })
                };

                Ok(ModelFiles {
                    config: fetch(CONFIG_FILE)?,
                    weights: fetch(WEIGHTS_FILE)?,
                })
            }
        }
    }

    /// Load a pretrained classifier and its eval transform for inference
    pub fn load(&self, identifier: &str, device: DeviceType) -> Result<LoadedModel> {
        let source = ModelSource::parse(identifier)?;
        info!("Loading model from {}", source);

        let files = self.resolve(&source)?;
        let config = HubModelConfig::from_file(&files.config)?;
        let variant = ConvNextVariant::from_architecture(&config.architecture)?;
        let labels = config.labels()?;
        let device = device.create()?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)
                .map_err(|e| Error::hub(format!("Failed to load weights: {}", e)))?
        };
        let module = convnext::convnext(&variant.config(), labels.len(), vb)
            .map_err(|e| Error::hub(format!("Failed to build {}: {}", config.architecture, e)))?;

        let transform = Transform::from_pretrained(&config.pretrained_cfg);
        info!(
            "Loaded {} ({:?}) with {} labels, input {:?}",
            config.architecture,
            variant,
            labels.len(),
            transform.input_shape()
        );

        Ok(LoadedModel::new(
            source.to_string(),
            Arc::new(module),
            transform,
            labels,
            device,
        ))
    }

    /// Build a trainable classifier with a fresh head of `num_classes` outputs.
    ///
    /// Every parameter except the classifier head is initialised from the
    /// pretrained checkpoint.
    pub fn load_trainable(
        &self,
        identifier: &str,
        num_classes: usize,
        device: DeviceType,
    ) -> Result<TrainableModel> {
        if num_classes == 0 {
            return Err(Error::config("Cannot build a classifier with zero classes"));
        }

        let source = ModelSource::parse(identifier)?;
        info!("Loading trainable model from {} with {} classes", source, num_classes);

        let files = self.resolve(&source)?;
        let config = HubModelConfig::from_file(&files.config)?;
        let variant = ConvNextVariant::from_architecture(&config.architecture)?;
        let device = device.create()?;

        let head_prefix = config.pretrained_cfg.classifier.clone();
        let varmap = VarMap::new();
        let vb = pretrained_var_builder(&varmap, &files.weights, &head_prefix, &device)?;
        let module = convnext::convnext(&variant.config(), num_classes, vb)
            .map_err(|e| Error::hub(format!("Failed to build {}: {}", config.architecture, e)))?;

        let copied = pretrained_count(&varmap, &head_prefix)?;
        info!(
            "Initialised {} pretrained tensors; '{}' left freshly initialised",
            copied, head_prefix
        );

        Ok(TrainableModel::new(
            Box::new(module),
            varmap,
            head_prefix,
            Transform::from_pretrained(&config.pretrained_cfg),
            device,
        ))
    }
}
