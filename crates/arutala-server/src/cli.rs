//! Command-line interface

use arutala_vision::DeviceType;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "arutala-server")]
#[command(about = "Arutala image classification API", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Model identifier (hf_hub:<org>/<repo>, <org>/<repo> or a local directory)
    #[arg(short, long, env = "ARUTALA_MODEL")]
    pub model: Option<String>,

    /// Device to run inference on (cpu, cuda[:N], metal[:N])
    #[arg(short, long, value_parser = parse_device)]
    pub device: Option<DeviceType>,

    /// Directory for cached hub downloads
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Listen address
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    pub listen: String,

    /// Listen port
    #[arg(short = 'P', long, default_value = "8000")]
    pub port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_device(s: &str) -> Result<DeviceType, String> {
    s.parse().map_err(|e: arutala_core::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["arutala-server"]);
        assert_eq!(cli.config, "config.yaml");
        assert_eq!(cli.listen, "0.0.0.0");
        assert_eq!(cli.port, 8000);
        assert!(cli.device.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_device_argument() {
        let cli = Cli::parse_from(["arutala-server", "--device", "cuda:1"]);
        assert_eq!(cli.device, Some(DeviceType::Cuda(1)));

        assert!(Cli::try_parse_from(["arutala-server", "--device", "tpu"]).is_err());
    }
}
