//! Inference handle shared by every request

use crate::transform::Transform;
use arutala_core::{PredictError, Prediction};
use candle_core::{Device, Tensor, D};
use candle_nn::Module;
use std::sync::Arc;

/// Any forward function mapping `[N, 3, H, W]` images to `[N, C]` logits
pub type SharedModule = Arc<dyn Module + Send + Sync>;

/// A ready-to-run classifier paired with its transform and label vocabulary.
///
/// Built once at startup and shared read-only; nothing here mutates after
/// construction.
pub struct LoadedModel {
    name: String,
    module: SharedModule,
    transform: Transform,
    labels: Vec<String>,
    device: Device,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("labels", &self.labels.len())
            .field("input_shape", &self.transform.input_shape())
            .field("device", &self.device)
            .finish()
    }
}

impl LoadedModel {
    /// Assemble a model handle from its parts
    pub fn new(
        name: impl Into<String>,
        module: SharedModule,
        transform: Transform,
        labels: Vec<String>,
        device: Device,
    ) -> Self {
        Self {
            name: name.into(),
            module,
            transform,
            labels,
            device,
        }
    }

    /// Model identifier this handle was loaded from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class labels, index-aligned with the logits
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Transform applied to every decoded image
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Device tensors are created on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Decode raw upload bytes and transform them into a `[3, H, W]` tensor
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Tensor, PredictError> {
        let image =
            image::load_from_memory(bytes).map_err(|e| PredictError::Decode(e.to_string()))?;

        self.transform
            .apply(&image, &self.device)
            .map_err(PredictError::execution)
    }

    /// Classify a single transformed image
    pub fn predict(&self, input: &Tensor) -> Result<Prediction, PredictError> {
        self.predict_batch(std::slice::from_ref(input))?
            .into_iter()
            .next()
            .ok_or_else(|| PredictError::Execution("model returned no prediction".to_string()))
    }

    /// Classify transformed images in one forward pass, preserving input order
    pub fn predict_batch(&self, inputs: &[Tensor]) -> Result<Vec<Prediction>, PredictError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let expected = self.transform.input_shape();
        for input in inputs {
            if input.dims() != expected.as_slice() {
                return Err(PredictError::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: input.dims().to_vec(),
                });
            }
        }

        let batch = Tensor::stack(inputs, 0).map_err(PredictError::execution)?;
        let logits = self.module.forward(&batch).map_err(PredictError::execution)?;

        match logits.dims() {
            [n, c] if *n == inputs.len() && *c == self.labels.len() => {}
            dims => {
                return Err(PredictError::Execution(format!(
                    "model produced logits of shape {:?} for {} images and {} labels",
                    dims,
                    inputs.len(),
                    self.labels.len()
                )))
            }
        }

        let (indices, probabilities) = top1(&logits).map_err(PredictError::execution)?;

        Ok(indices
            .into_iter()
            .zip(probabilities)
            .map(|(idx, probability)| {
                let label = self
                    .labels
                    .get(idx as usize)
                    .cloned()
                    .unwrap_or_else(|| format!("label_{}", idx));
                Prediction::new(label, probability)
            })
            .collect())
    }
}

/// Arg-max class and its softmax probability for each row of `[N, C]` logits
pub fn top1(logits: &Tensor) -> candle_core::Result<(Vec<u32>, Vec<f32>)> {
    let probs = candle_nn::ops::softmax(logits, D::Minus1)?;
    let indices = probs.argmax(D::Minus1)?.to_vec1::<u32>()?;
    let probabilities = probs.max(D::Minus1)?.to_vec1::<f32>()?;
    Ok((indices, probabilities))
}
