//! Configuration of [`RnnQNet`](super::RnnQNet).
use super::{RnnQNet, RnnQNetParams};
use crate::opt::OptimizerConfig;
use anyhow::Result;
use log::info;
use ndarray::{Array1, Array2};
use rand::{rngs::SmallRng, Rng};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`RnnQNet`](super::RnnQNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnQNetConfig {
    /// Width of the state vector.
    pub input_dim: usize,

    /// Hidden layer width.
    pub hidden_dim: usize,

    /// Classes per episode; the action space is `classes + 1`.
    pub classes: usize,

    /// Optimizer settings.
    pub opt_config: OptimizerConfig,
}

impl RnnQNetConfig {
    /// Constructs the configuration with the default optimizer.
    pub fn new(input_dim: usize, hidden_dim: usize, classes: usize) -> Self {
        Self {
            input_dim,
            hidden_dim,
            classes,
            opt_config: OptimizerConfig::default(),
        }
    }

    /// Sets the optimizer settings.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Builds the network with uniformly initialized weights.
    pub fn build(&self, rng: &mut SmallRng) -> RnnQNet {
        let actions = self.classes + 1;
        let k = 1.0 / (self.hidden_dim as f32).sqrt();
        let mut mat = |rows: usize, cols: usize| {
            Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-k..k))
        };
        let params = RnnQNetParams {
            wxh: mat(self.input_dim, self.hidden_dim),
            whh: mat(self.hidden_dim, self.hidden_dim),
            why: mat(self.hidden_dim, actions),
            bh: Array1::zeros(self.hidden_dim),
            by: Array1::zeros(actions),
        };
        info!(
            "Built RnnQNet: input {}, hidden {}, actions {}",
            self.input_dim, self.hidden_dim, actions
        );
        RnnQNet::from_parts(
            self.classes,
            self.input_dim,
            self.hidden_dim,
            params,
            self.opt_config.build(),
        )
    }

    /// Constructs [`RnnQNetConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`RnnQNetConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn config_round_trips_through_yaml() {
        let dir = TempDir::new("rnn_config").unwrap();
        let path = dir.path().join("rnn.yaml");

        let config = RnnQNetConfig::new(25, 64, 3)
            .opt_config(OptimizerConfig::default().learning_rate(5e-4));
        config.save(&path).unwrap();
        assert_eq!(RnnQNetConfig::load(&path).unwrap(), config);
    }
}
