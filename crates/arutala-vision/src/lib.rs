//! Arutala Vision
//!
//! Model provider for the inference service and the training loop.
//!
//! Given a model identifier (a Hugging Face repository in timm layout or a
//! local directory) it resolves `config.json` and `model.safetensors`, builds a
//! Candle ConvNeXt, and pairs it with the transform its weights expect.
//!
//! - [`ModelProvider::load`] returns an immutable [`LoadedModel`] for serving.
//! - [`ModelProvider::load_trainable`] returns a [`TrainableModel`] whose
//!   classifier head is replaced by a fresh one sized to the caller's classes.

pub mod classifier;
pub mod model_config;
pub mod model_loader;
pub mod trainable;
pub mod transform;

pub use classifier::{top1, LoadedModel, SharedModule};
pub use model_config::{normalized_labels, ConvNextVariant, HubModelConfig, PretrainedConfig};
pub use model_loader::{DeviceType, ModelFiles, ModelProvider, ModelSource};
pub use trainable::{
    is_under_prefix, pretrained_count, pretrained_var_builder, PretrainedVarBackend, TrainableModel,
};
pub use transform::{flatten_alpha, Transform};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::LoadedModel;
    pub use crate::model_loader::{DeviceType, ModelProvider, ModelSource};
    pub use crate::trainable::TrainableModel;
    pub use crate::transform::Transform;
}
