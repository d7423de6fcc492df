//! Trainable classifier backed by a `VarMap`

use crate::transform::Transform;
use arutala_core::{Error, Result};
use candle_core::{DType, Device, Shape, Tensor, Var};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, Module, VarBuilder, VarMap};
use std::collections::HashMap;
use std::path::Path;

/// A classifier whose parameters live in a `VarMap` and can be optimized
pub struct TrainableModel {
    module: Box<dyn Module + Send + Sync>,
    varmap: VarMap,
    head_prefix: String,
    transform: Transform,
    device: Device,
}

impl TrainableModel {
    pub fn new(
        module: Box<dyn Module + Send + Sync>,
        varmap: VarMap,
        head_prefix: impl Into<String>,
        transform: Transform,
        device: Device,
    ) -> Self {
        Self {
            module,
            varmap,
            head_prefix: head_prefix.into(),
            transform,
            device,
        }
    }

    /// Parameter store holding every learnable tensor
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Prefix naming the classifier head parameters
    pub fn head_prefix(&self) -> &str {
        &self.head_prefix
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Total number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}

impl Module for TrainableModel {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.module.forward(xs)
    }
}

/// Whether a parameter name belongs to the module rooted at `prefix`
pub fn is_under_prefix(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Variable source for fine-tuning.
///
/// Parameters under `head_prefix` are created fresh in the `VarMap` using the
/// layer's init hint. Every other parameter is copied out of the pretrained
/// checkpoint into a new `Var`. Names the checkpoint does not carry are
/// reported missing, so optional layers (GRN, layer scale) are only built
/// when the weights have them and never end up in the `VarMap`.
pub struct PretrainedVarBackend {
    varmap: VarMap,
    pretrained: HashMap<String, Tensor>,
    head_prefix: String,
}

impl PretrainedVarBackend {
    pub fn new(
        varmap: VarMap,
        pretrained: HashMap<String, Tensor>,
        head_prefix: impl Into<String>,
    ) -> Self {
        Self {
            varmap,
            pretrained,
            head_prefix: head_prefix.into(),
        }
    }
}

impl SimpleBackend for PretrainedVarBackend {
    fn get(
        &self,
        s: Shape,
        name: &str,
        h: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        if is_under_prefix(name, &self.head_prefix) {
            return self.varmap.get(s, name, h, dtype, dev);
        }

        let mut vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".to_string()))?;

        if let Some(var) = vars.get(name) {
            if var.shape() != &s {
                return Err(shape_mismatch(name, s, var.shape().clone()));
            }
            return Ok(var.as_tensor().clone());
        }

        let tensor = self.pretrained.get(name).ok_or_else(|| {
            candle_core::Error::CannotFindTensor {
                path: name.to_string(),
            }
            .bt()
        })?;
        if tensor.shape() != &s {
            return Err(shape_mismatch(name, s, tensor.shape().clone()));
        }

        let var = Var::from_tensor(&tensor.to_device(dev)?.to_dtype(dtype)?)?;
        let out = var.as_tensor().clone();
        vars.insert(name.to_string(), var);
        Ok(out)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        is_under_prefix(name, &self.head_prefix) || self.pretrained.contains_key(name)
    }
}

fn shape_mismatch(name: &str, expected: Shape, got: Shape) -> candle_core::Error {
    candle_core::Error::UnexpectedShape {
        msg: format!("shape mismatch for {}", name),
        expected,
        got,
    }
    .bt()
}

/// Build a `VarBuilder` over `weights` that fills `varmap` as the model is constructed
pub fn pretrained_var_builder(
    varmap: &VarMap,
    weights: impl AsRef<Path>,
    head_prefix: &str,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let weights = weights.as_ref();
    let pretrained = candle_core::safetensors::load(weights, device).map_err(|e| {
        Error::hub(format!("Failed to read weights {}: {}", weights.display(), e))
    })?;

    let backend = PretrainedVarBackend::new(varmap.clone(), pretrained, head_prefix);
    Ok(VarBuilder::from_backend(
        Box::new(backend),
        DType::F32,
        device.clone(),
    ))
}

/// Number of variables in `varmap` that came from the checkpoint
pub fn pretrained_count(varmap: &VarMap, head_prefix: &str) -> Result<usize> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| Error::execution("parameter map lock poisoned"))?;
    Ok(vars
        .keys()
        .filter(|name| !is_under_prefix(name, head_prefix))
        .count())
}
