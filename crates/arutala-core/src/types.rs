//! Core types for Arutala

use serde::{Deserialize, Serialize};

/// Top-1 prediction for a single image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label, one of the model's label names
    pub label: String,

    /// Softmax probability of `label` (0.0-1.0)
    pub probability: f32,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

/// Predictions for a batch of images, split into parallel sequences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPrediction {
    /// Labels in input order
    pub predictions: Vec<String>,

    /// Top-1 probabilities in input order
    pub probabilities: Vec<f32>,
}

impl FromIterator<Prediction> for BatchPrediction {
    fn from_iter<I: IntoIterator<Item = Prediction>>(iter: I) -> Self {
        let (predictions, probabilities) = iter
            .into_iter()
            .map(|p| (p.label, p.probability))
            .unzip();

        Self {
            predictions,
            probabilities,
        }
    }
}

impl BatchPrediction {
    /// Number of images in the batch
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}
