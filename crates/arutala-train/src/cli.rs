//! Command-line interface

use arutala_vision::DeviceType;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "arutala-train")]
#[command(about = "Fine-tune a ConvNeXt classifier on an image folder", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "train.yaml")]
    pub config: String,

    /// Pretrained model identifier
    #[arg(short, long)]
    pub model_path: Option<String>,

    #[arg(short, long)]
    pub batch_size: Option<usize>,

    #[arg(short, long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long)]
    pub weight_decay: Option<f64>,

    /// Training images, one sub-directory per class
    #[arg(long)]
    pub train_dir: Option<PathBuf>,

    /// Validation images, laid out like the training directory
    #[arg(long)]
    pub val_dir: Option<PathBuf>,

    /// Device to train on (cpu, cuda[:N], metal[:N])
    #[arg(short, long, value_parser = parse_device)]
    pub device: Option<DeviceType>,

    /// Disable dynamic loss scaling
    #[arg(long)]
    pub no_amp: bool,

    /// Directory receiving one checkpoint per epoch
    #[arg(long)]
    pub model_save_dir: Option<PathBuf>,

    /// Only optimize the classifier head
    #[arg(long)]
    pub freeze_backbone: bool,

    /// Seed for shuffling and augmentation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for cached hub downloads
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Write the per-epoch metrics as JSON to this path
    #[arg(long)]
    pub result_json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_device(s: &str) -> Result<DeviceType, String> {
    s.parse().map_err(|e: arutala_core::Error| e.to_string())
}
