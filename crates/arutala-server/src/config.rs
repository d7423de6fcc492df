//! Server configuration

use crate::cli::Cli;
use arutala_vision::DeviceType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Model identifier passed to the model provider
    #[serde(default = "default_model")]
    pub model: String,

    /// Inference device
    #[serde(default)]
    pub device: DeviceType,

    /// Hub download cache, hf-hub default when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Largest accepted request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Self::from_file_or_default(&cli.config)?;

        if let Some(model) = &cli.model {
            config.model = model.clone();
        }

        if let Some(device) = cli.device {
            config.device = device;
        }

        if let Some(cache_dir) = &cli.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }

        Ok(config)
    }

    /// Parse a YAML file, falling back to defaults when it does not exist
    pub fn from_file_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            device: DeviceType::default(),
            cache_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_model() -> String {
    "hf_hub:taufiqdp/convnext_tiny-arutala".to_string()
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::from_file_or_default("/nonexistent/arutala.yaml").unwrap();
        assert_eq!(config.model, "hf_hub:taufiqdp/convnext_tiny-arutala");
        assert_eq!(config.device, DeviceType::Cpu);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device: cuda:0").unwrap();

        let config = ServerConfig::from_file_or_default(file.path()).unwrap();
        assert_eq!(config.device, DeviceType::Cuda(0));
        assert_eq!(config.model, "hf_hub:taufiqdp/convnext_tiny-arutala");
    }

    #[test]
    fn test_invalid_device_in_yaml_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device: abacus").unwrap();

        assert!(ServerConfig::from_file_or_default(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model: org/from-file").unwrap();
        writeln!(file, "device: cpu").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::parse_from([
            "arutala-server",
            "--config",
            path.as_str(),
            "--model",
            "org/from-cli",
            "--device",
            "metal",
        ]);

        let config = ServerConfig::load(&cli).unwrap();
        assert_eq!(config.model, "org/from-cli");
        assert_eq!(config.device, DeviceType::Metal(0));
    }
}
