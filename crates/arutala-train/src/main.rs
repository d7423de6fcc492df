//! Arutala Train
//!
//! Command-line entry point for fine-tuning.

use anyhow::Result;
use arutala_train::{Cli, TrainConfig};
use clap::Parser;
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = TrainConfig::load(&cli)?;
    info!("Configuration loaded successfully");
    info!("Model: {}", config.model_path);
    info!("Device: {}", config.device);
    info!(
        "Epochs: {} | batch size: {} | lr: {} | weight decay: {}",
        config.epochs, config.batch_size, config.learning_rate, config.weight_decay
    );

    let result = arutala_train::run(&config)?;

    if let (Some(loss), Some(acc)) = (result.val_loss.last(), result.val_accuracy.last()) {
        info!("Final validation loss: {:.4} | accuracy: {:.4}", loss, acc);
    }

    if let Some(path) = &cli.result_json {
        result.write_json(path)?;
        info!("Wrote training result to {}", path.display());
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("arutala=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arutala=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
