//! Training configuration

use crate::cli::Cli;
use arutala_core::{Error, Result};
use arutala_vision::DeviceType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hyperparameters and paths for one fine-tuning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Pretrained model identifier
    pub model_path: String,

    pub batch_size: usize,

    pub epochs: usize,

    pub learning_rate: f64,

    /// Decoupled weight decay applied to kernel parameters only
    pub weight_decay: f64,

    pub train_dir: PathBuf,

    pub val_dir: PathBuf,

    pub device: DeviceType,

    /// Dynamic loss scaling
    pub use_amp: bool,

    pub model_save_dir: PathBuf,

    /// Only optimize the classifier head
    pub freeze_backbone: bool,

    /// Seed for shuffling and augmentation, entropy when unset
    pub seed: Option<u64>,

    /// Hub download cache, hf-hub default when unset
    pub cache_dir: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_path: "timm/convnext_tiny.in12k_ft_in1k".to_string(),
            batch_size: 32,
            epochs: 15,
            learning_rate: 5e-5,
            weight_decay: 0.001,
            train_dir: PathBuf::from("data/train"),
            val_dir: PathBuf::from("data/test"),
            device: DeviceType::Cuda(0),
            use_amp: true,
            model_save_dir: PathBuf::from("models"),
            freeze_backbone: false,
            seed: None,
            cache_dir: None,
        }
    }
}

impl TrainConfig {
    /// Load configuration from file and CLI overrides, then validate
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = Self::from_file_or_default(&cli.config)?;
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file, falling back to defaults when it does not exist
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("Invalid config {}: {}", path.display(), e)))
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(model_path) = &cli.model_path {
            self.model_path = model_path.clone();
        }
        if let Some(batch_size) = cli.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(epochs) = cli.epochs {
            self.epochs = epochs;
        }
        if let Some(lr) = cli.learning_rate {
            self.learning_rate = lr;
        }
        if let Some(wd) = cli.weight_decay {
            self.weight_decay = wd;
        }
        if let Some(dir) = &cli.train_dir {
            self.train_dir = dir.clone();
        }
        if let Some(dir) = &cli.val_dir {
            self.val_dir = dir.clone();
        }
        if let Some(device) = cli.device {
            self.device = device;
        }
        if cli.no_amp {
            self.use_amp = false;
        }
        if let Some(dir) = &cli.model_save_dir {
            self.model_save_dir = dir.clone();
        }
        if cli.freeze_backbone {
            self.freeze_backbone = true;
        }
        if cli.seed.is_some() {
            self.seed = cli.seed;
        }
        if let Some(dir) = &cli.cache_dir {
            self.cache_dir = Some(dir.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be greater than zero"));
        }
        if self.epochs == 0 {
            return Err(Error::config("epochs must be greater than zero"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(Error::config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TrainConfig::default();
        assert_eq!(config.model_path, "timm/convnext_tiny.in12k_ft_in1k");
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.epochs, 15);
        assert_eq!(config.learning_rate, 5e-5);
        assert_eq!(config.weight_decay, 0.001);
        assert_eq!(config.device, DeviceType::Cuda(0));
        assert!(config.use_amp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "epochs: 3").unwrap();
        writeln!(file, "device: cpu").unwrap();
        writeln!(file, "use_amp: false").unwrap();

        let config = TrainConfig::from_file_or_default(file.path()).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.device, DeviceType::Cpu);
        assert!(!config.use_amp);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.train_dir, PathBuf::from("data/train"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "epochs: 3").unwrap();
        writeln!(file, "batch_size: 8").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::parse_from([
            "arutala-train",
            "--config",
            path.as_str(),
            "--epochs",
            "1",
            "--device",
            "cpu",
            "--no-amp",
            "--freeze-backbone",
        ]);

        let config = TrainConfig::load(&cli).unwrap();
        assert_eq!(config.epochs, 1);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.device, DeviceType::Cpu);
        assert!(!config.use_amp);
        assert!(config.freeze_backbone);
    }

    #[test]
    fn test_validation() {
        let invalid = [
            TrainConfig { batch_size: 0, ..Default::default() },
            TrainConfig { epochs: 0, ..Default::default() },
            TrainConfig { learning_rate: 0.0, ..Default::default() },
            TrainConfig { learning_rate: f64::NAN, ..Default::default() },
            TrainConfig { weight_decay: -0.1, ..Default::default() },
        ];

        for config in invalid {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }

        let no_decay = TrainConfig { weight_decay: 0.0, ..Default::default() };
        assert!(no_decay.validate().is_ok());
    }
}
