//! Arutala Train
//!
//! Fine-tunes a pretrained ConvNeXt on an image folder.
//!
//! Each run opens the training and validation folders, replaces the
//! classifier head to fit the class count, and trains for a fixed number of
//! epochs with grouped AdamW, cosine annealing and dynamic loss scaling. A
//! checkpoint is written after every epoch.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod optim;
pub mod scaler;
pub mod schedule;

pub use cli::Cli;
pub use config::TrainConfig;
pub use dataset::{Batch, DataLoader, ImageFolder, LoaderMode};
pub use engine::{run, Trainer, TrainerOptions, TrainingResult};
pub use optim::{GroupedAdamW, ParamGroups, ParamRole};
pub use scaler::GradScaler;
pub use schedule::CosineAnnealingLr;
