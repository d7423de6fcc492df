//! Parameter grouping and the grouped AdamW optimizer

use arutala_core::{Error, Result};
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};

/// What a parameter does, derived from its name and rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Additive offset, name ends in `.bias`
    Bias,
    /// Per-channel scale such as a norm weight or layer scale (rank <= 1)
    Scale,
    /// Convolution or linear weight
    Kernel,
}

impl ParamRole {
    pub fn classify(name: &str, rank: usize) -> Self {
        if name.ends_with(".bias") {
            Self::Bias
        } else if rank <= 1 {
            Self::Scale
        } else {
            Self::Kernel
        }
    }

    /// Whether weight decay applies to parameters in this role
    pub fn decays(self) -> bool {
        matches!(self, Self::Kernel)
    }
}

/// Trainable parameters split by whether they take weight decay
#[derive(Debug, Default)]
pub struct ParamGroups {
    pub decay: Vec<(String, Var)>,
    pub no_decay: Vec<(String, Var)>,
}

impl ParamGroups {
    /// Partition every variable in `varmap` accepted by `trainable`.
    ///
    /// Names are sorted so group order is stable across runs.
    pub fn partition(varmap: &VarMap, trainable: impl Fn(&str) -> bool) -> Result<Self> {
        let vars = varmap
            .data()
            .lock()
            .map_err(|_| Error::execution("parameter map lock poisoned"))?;

        let mut named: Vec<(&String, &Var)> = vars
            .iter()
            .filter(|(name, _)| trainable(name))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));

        let mut groups = Self::default();
        for (name, var) in named {
            let entry = (name.clone(), var.clone());
            if ParamRole::classify(name, var.rank()).decays() {
                groups.decay.push(entry);
            } else {
                groups.no_decay.push(entry);
            }
        }
        Ok(groups)
    }

    pub fn len(&self) -> usize {
        self.decay.len() + self.no_decay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decay.is_empty() && self.no_decay.is_empty()
    }

    /// Every variable across both groups
    pub fn vars(&self) -> Vec<Var> {
        self.no_decay
            .iter()
            .chain(self.decay.iter())
            .map(|(_, var)| var.clone())
            .collect()
    }

    /// Number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.no_decay
            .iter()
            .chain(self.decay.iter())
            .map(|(_, var)| var.elem_count())
            .sum()
    }
}

/// AdamW with one weight-decay setting per parameter group, sharing a learning rate
pub struct GroupedAdamW {
    optimizers: Vec<AdamW>,
    learning_rate: f64,
}

impl GroupedAdamW {
    /// Zero decay for the no-decay group, `weight_decay` for the rest; empty groups are skipped
    pub fn new(groups: &ParamGroups, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let mut optimizers = Vec::new();

        for (params, wd) in [(&groups.no_decay, 0.0), (&groups.decay, weight_decay)] {
            if params.is_empty() {
                continue;
            }
            let vars = params.iter().map(|(_, var)| var.clone()).collect();
            let config = ParamsAdamW {
                lr: learning_rate,
                weight_decay: wd,
                ..Default::default()
            };
            optimizers.push(AdamW::new(vars, config)?);
        }

        Ok(Self {
            optimizers,
            learning_rate,
        })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        for optimizer in &mut self.optimizers {
            optimizer.step(grads)?;
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
        for optimizer in &mut self.optimizers {
            optimizer.set_learning_rate(lr);
        }
    }

    /// Number of non-empty parameter groups
    pub fn num_groups(&self) -> usize {
        self.optimizers.len()
    }
}
