//! Optimizers.
use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

/// Configuration of the optimizer updating the network parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f32,
        /// Exponential decay of the first moment estimate.
        #[serde(default = "default_beta1")]
        beta1: f32,
        /// Exponential decay of the second moment estimate.
        #[serde(default = "default_beta2")]
        beta2: f32,
        /// Numerical stability term.
        #[serde(default = "default_eps")]
        eps: f32,
    },
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_eps() -> f32 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: 1e-3,
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
        }
    }
}

impl OptimizerConfig {
    /// Constructs the optimizer.
    pub fn build(&self) -> Adam {
        match self {
            OptimizerConfig::Adam {
                lr,
                beta1,
                beta2,
                eps,
            } => Adam {
                lr: *lr,
                beta1: *beta1,
                beta2: *beta2,
                eps: *eps,
                t: 0,
                m: Vec::new(),
                v: Vec::new(),
            },
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f32) -> Self {
        match self {
            Self::Adam {
                lr: _,
                beta1,
                beta2,
                eps,
            } => Self::Adam {
                lr,
                beta1,
                beta2,
                eps,
            },
        }
    }
}

/// Adam over a fixed set of parameter slots.
///
/// Moment buffers are keyed by slot index and sized lazily on first use;
/// callers assign one slot per parameter tensor and keep the assignment
/// stable across steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    /// Opens one optimization boundary; call once before the slot updates
    /// of a step.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Applies one Adam update to a parameter tensor in place.
    pub fn update<D: Dimension>(
        &mut self,
        slot: usize,
        param: &mut Array<f32, D>,
        grad: &Array<f32, D>,
    ) {
        debug_assert_eq!(param.len(), grad.len());
        while self.m.len() <= slot {
            self.m.push(Vec::new());
            self.v.push(Vec::new());
        }
        if self.m[slot].len() != param.len() {
            self.m[slot] = vec![0.0; param.len()];
            self.v[slot] = vec![0.0; param.len()];
        }

        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        let m = &mut self.m[slot];
        let v = &mut self.v[slot];
        for (i, (p, g)) in param.iter_mut().zip(grad.iter()).enumerate() {
            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
            v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = m[i] / bias1;
            let v_hat = v[i] / bias2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}
