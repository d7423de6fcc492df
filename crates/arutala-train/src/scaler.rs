//! Dynamic loss scaling
//!
//! The loss is multiplied by a large factor before backward so that small
//! gradients survive reduced-precision arithmetic, then the gradients are
//! divided back down before the optimizer sees them. A step whose gradients
//! contain inf or NaN is skipped and the scale shrinks; after a run of clean
//! steps the scale grows again.

use arutala_core::Result;
use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    clean_steps: usize,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(65536.0, 2.0, 0.5, 2000)
    }
}

impl GradScaler {
    pub fn new(
        init_scale: f64,
        growth_factor: f64,
        backoff_factor: f64,
        growth_interval: usize,
    ) -> Self {
        Self {
            enabled: true,
            scale: init_scale,
            growth_factor,
            backoff_factor,
            growth_interval: growth_interval.max(1),
            clean_steps: 0,
        }
    }

    /// A scaler that passes losses and gradients through untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current scale factor, 1.0 when disabled
    pub fn scale(&self) -> f64 {
        if self.enabled {
            self.scale
        } else {
            1.0
        }
    }

    pub fn scale_loss(&self, loss: &Tensor) -> Result<Tensor> {
        if !self.enabled {
            return Ok(loss.clone());
        }
        Ok(loss.affine(self.scale, 0.0)?)
    }

    /// Divide the gradients of `vars` by the scale in place.
    ///
    /// Returns true when any of them is not finite, in which case the step
    /// must be skipped.
    pub fn unscale(&self, grads: &mut GradStore, vars: &[Var]) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let inv_scale = 1.0 / self.scale;
        let mut found_inf = false;
        for var in vars {
            let Some(grad) = grads.remove(var.as_tensor()) else {
                continue;
            };
            let grad = grad.affine(inv_scale, 0.0)?;
            if !found_inf && !is_finite(&grad)? {
                found_inf = true;
            }
            grads.insert(var.as_tensor(), grad);
        }
        Ok(found_inf)
    }

    /// Adjust the scale after a step
    pub fn update(&mut self, found_inf: bool) {
        if !self.enabled {
            return;
        }

        if found_inf {
            self.scale *= self.backoff_factor;
            self.clean_steps = 0;
            debug!(scale = self.scale, "Non-finite gradients, reducing loss scale");
            return;
        }

        self.clean_steps += 1;
        if self.clean_steps >= self.growth_interval {
            self.scale *= self.growth_factor;
            self.clean_steps = 0;
            debug!(scale = self.scale, "Growing loss scale");
        }
    }
}

/// Any inf or NaN element propagates into the sum
fn is_finite(t: &Tensor) -> Result<bool> {
    let total = t.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    Ok(total.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn var(values: &[f32]) -> Var {
        Var::new(values, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_unscale_restores_true_gradient() {
        let scaler = GradScaler::default();
        let w = var(&[1.0, 2.0]);

        let loss = w.as_tensor().affine(3.0, 0.0).unwrap().sum_all().unwrap();
        let mut grads = scaler.scale_loss(&loss).unwrap().backward().unwrap();
        let found_inf = scaler.unscale(&mut grads, &[w.clone()]).unwrap();

        assert!(!found_inf);
        let grad: Vec<f32> = grads.get(w.as_tensor()).unwrap().to_vec1().unwrap();
        assert_eq!(grad, vec![3.0, 3.0]);
    }

    #[test]
    fn test_backs_off_on_overflow() {
        let mut scaler = GradScaler::default();
        let w = var(&[1.0]);

        let loss = w.as_tensor().affine(f64::INFINITY, 0.0).unwrap().sum_all().unwrap();
        let mut grads = scaler.scale_loss(&loss).unwrap().backward().unwrap();
        let found_inf = scaler.unscale(&mut grads, &[w]).unwrap();
        assert!(found_inf);

        scaler.update(found_inf);
        assert_eq!(scaler.scale(), 32768.0);
    }

    #[test]
    fn test_grows_after_interval() {
        let mut scaler = GradScaler::new(8.0, 2.0, 0.5, 3);

        scaler.update(false);
        scaler.update(false);
        assert_eq!(scaler.scale(), 8.0);
        scaler.update(false);
        assert_eq!(scaler.scale(), 16.0);

        // overflow resets the clean-step count
        scaler.update(false);
        scaler.update(true);
        assert_eq!(scaler.scale(), 8.0);
        scaler.update(false);
        scaler.update(false);
        assert_eq!(scaler.scale(), 8.0);
    }

    #[test]
    fn test_disabled_is_identity() {
        let mut scaler = GradScaler::disabled();
        let w = var(&[2.0]);
        let loss = w.as_tensor().sum_all().unwrap();

        let scaled = scaler.scale_loss(&loss).unwrap();
        assert_eq!(scaled.to_scalar::<f32>().unwrap(), 2.0);

        let mut grads = scaled.backward().unwrap();
        assert!(!scaler.unscale(&mut grads, &[w]).unwrap());
        scaler.update(true);
        assert_eq!(scaler.scale(), 1.0);
    }
}
