//! Hub model configuration (`config.json`) structures

use arutala_core::{Error, Result};
use candle_transformers::models::convnext;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ImageNet channel means used when a config omits them
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations used when a config omits them
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model configuration as published alongside timm weights on the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubModelConfig {
    /// Architecture name, e.g. `convnext_tiny`
    pub architecture: String,

    /// Size of the classifier head
    #[serde(default)]
    pub num_classes: Option<usize>,

    /// Width of the pooled feature vector feeding the head
    #[serde(default)]
    pub num_features: Option<usize>,

    /// Human readable class names, index-aligned with the head outputs
    #[serde(default)]
    pub label_names: Vec<String>,

    /// Preprocessing parameters the weights were trained with
    #[serde(default)]
    pub pretrained_cfg: PretrainedConfig,
}

/// Input resolution and normalization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PretrainedConfig {
    /// Channels, height, width
    #[serde(default = "default_input_size")]
    pub input_size: [usize; 3],

    /// Resampling filter name (bicubic, bilinear, nearest)
    #[serde(default = "default_interpolation")]
    pub interpolation: String,

    /// Fraction of the resized image kept by the center crop
    #[serde(default = "default_crop_pct")]
    pub crop_pct: f32,

    /// Per-channel mean
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],

    /// Per-channel standard deviation
    #[serde(default = "default_std")]
    pub std: [f32; 3],

    /// Parameter prefix of the classifier head
    #[serde(default = "default_classifier")]
    pub classifier: String,
}

fn default_input_size() -> [usize; 3] {
    [3, 224, 224]
}

fn default_interpolation() -> String {
    "bicubic".to_string()
}

fn default_crop_pct() -> f32 {
    0.875
}

fn default_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STD
}

fn default_classifier() -> String {
    "head.fc".to_string()
}

impl Default for PretrainedConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            interpolation: default_interpolation(),
            crop_pct: default_crop_pct(),
            mean: default_mean(),
            std: default_std(),
            classifier: default_classifier(),
        }
    }
}

impl HubModelConfig {
    /// Load a configuration from a `config.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        Self::from_json(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config {}: {}", path.display(), e)))
    }

    /// Parse a configuration from JSON text
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Number of head outputs, falling back to the label count
    pub fn resolved_num_classes(&self) -> Result<usize> {
        match (self.num_classes, self.label_names.len()) {
            (Some(n), _) if n > 0 => Ok(n),
            (_, n) if n > 0 => Ok(n),
            _ => Err(Error::config(format!(
                "Model '{}' declares neither num_classes nor label_names",
                self.architecture
            ))),
        }
    }

    /// Label names padded to `num_classes` with `label_{i}` placeholders
    pub fn labels(&self) -> Result<Vec<String>> {
        let num_classes = self.resolved_num_classes()?;
        Ok(normalized_labels(num_classes, &self.label_names))
    }
}

/// Pad or generate labels so there is exactly one per class
pub fn normalized_labels(num_classes: usize, labels: &[String]) -> Vec<String> {
    let mut resolved: Vec<String> = labels.iter().take(num_classes).cloned().collect();
    for idx in resolved.len()..num_classes {
        resolved.push(format!("label_{}", idx));
    }
    resolved
}

/// ConvNeXt sizes understood by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvNextVariant {
    Atto,
    Femto,
    Pico,
    Nano,
    Tiny,
    Small,
    Base,
    Large,
    XLarge,
}

impl ConvNextVariant {
    /// Resolve a variant from a timm architecture name such as `convnext_tiny`
    pub fn from_architecture(name: &str) -> Result<Self> {
        let name = name.to_lowercase();
        let size = name
            .strip_prefix("convnext_")
            .ok_or_else(|| Error::config(format!("Unsupported architecture: {}", name)))?;

        // Tags like `tiny.in12k_ft_in1k` or `tiny_hnf` carry the size first
        let size = size.split(['.', '_']).next().unwrap_or(size);

        match size {
            "atto" => Ok(Self::Atto),
            "femto" => Ok(Self::Femto),
            "pico" => Ok(Self::Pico),
            "nano" => Ok(Self::Nano),
            "tiny" => Ok(Self::Tiny),
            "small" => Ok(Self::Small),
            "base" => Ok(Self::Base),
            "large" => Ok(Self::Large),
            "xlarge" => Ok(Self::XLarge),
            other => Err(Error::config(format!("Unsupported ConvNeXt size: {}", other))),
        }
    }

    /// Candle model configuration for this size
    pub fn config(&self) -> convnext::Config {
        match self {
            Self::Atto => convnext::Config::atto(),
            Self::Femto => convnext::Config::femto(),
            Self::Pico => convnext::Config::pico(),
            Self::Nano => convnext::Config::nano(),
            Self::Tiny => convnext::Config::tiny(),
            Self::Small => convnext::Config::small(),
            Self::Base => convnext::Config::base(),
            Self::Large => convnext::Config::large(),
            Self::XLarge => convnext::Config::xlarge(),
        }
    }
}
