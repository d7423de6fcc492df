//! Application state shared across all requests

use crate::config::ServerConfig;
use arutala_vision::{LoadedModel, ModelProvider};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ServerConfig>,

    /// The classifier, immutable after startup
    pub model: Arc<LoadedModel>,

    /// Prometheus handle for rendering, absent when no recorder is installed
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Resolve and load the configured model
    pub fn load(config: ServerConfig, metrics_handle: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        info!(model = %config.model, device = %config.device, "Loading model");

        let mut provider = ModelProvider::new();
        if let Some(dir) = &config.cache_dir {
            provider = provider.with_cache_dir(dir.clone());
        }

        let model = provider.load(&config.model, config.device)?;
        info!(
            labels = model.labels().len(),
            input_shape = ?model.transform().input_shape(),
            "Model ready"
        );

        Ok(Self::new(config, model, metrics_handle))
    }

    /// Wrap an already-loaded model
    pub fn new(
        config: ServerConfig,
        model: LoadedModel,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            model: Arc::new(model),
            metrics_handle,
        }
    }
}
