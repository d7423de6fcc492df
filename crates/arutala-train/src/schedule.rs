//! Per-epoch learning rate schedule

/// Cosine annealing from the base learning rate down to `eta_min` over `t_max` epochs
#[derive(Debug, Clone)]
pub struct CosineAnnealingLr {
    base_lr: f64,
    eta_min: f64,
    t_max: usize,
    epoch: usize,
}

impl CosineAnnealingLr {
    pub fn new(base_lr: f64, t_max: usize) -> Self {
        Self::with_eta_min(base_lr, t_max, 0.0)
    }

    pub fn with_eta_min(base_lr: f64, t_max: usize, eta_min: f64) -> Self {
        Self {
            base_lr,
            eta_min,
            t_max,
            epoch: 0,
        }
    }

    /// Learning rate for the current epoch
    pub fn lr(&self) -> f64 {
        self.lr_at(self.epoch)
    }

    /// Learning rate after `epoch` completed steps
    pub fn lr_at(&self, epoch: usize) -> f64 {
        if self.t_max == 0 {
            return self.base_lr;
        }
        let progress = epoch as f64 / self.t_max as f64;
        let cosine = (std::f64::consts::PI * progress).cos();
        self.eta_min + (self.base_lr - self.eta_min) * (1.0 + cosine) / 2.0
    }

    /// Advance one epoch and return the new learning rate
    pub fn step(&mut self) -> f64 {
        self.epoch += 1;
        self.lr()
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }
}
