//! Configuration of [`EpisodeTrainer`](super::EpisodeTrainer).
use crate::stats::DEFAULT_BUCKETS;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How parameter updates are scheduled within an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainMode {
    /// One temporal-difference update per timestep, gradients cut at each
    /// optimization boundary.
    OnlineTd,
    /// One supervised update per episode over the teacher-forced sequence.
    Sequence,
}

/// Configuration of [`EpisodeTrainer`](super::EpisodeTrainer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Update scheduling mode.
    pub mode: TrainMode,

    /// Discount factor of the temporal-difference target.
    pub gamma: f32,

    /// Exploration probability.
    pub eps: f32,

    /// Episodes advanced in lockstep per epoch.
    pub batch_size: usize,

    /// Number of training epochs, one episode batch each.
    pub epochs: usize,

    /// Interval of evaluation in epochs.
    pub eval_interval: usize,

    /// Interval of saving the rolling checkpoint in epochs.
    pub save_interval: usize,

    /// Interval of keeping a numbered backup checkpoint in epochs.
    pub backup_interval: usize,

    /// Where checkpoints and the best model go; `None` disables saving.
    pub model_dir: Option<String>,

    /// K-shot occurrence buckets to track.
    pub buckets: Vec<usize>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            mode: TrainMode::OnlineTd,
            gamma: 0.5,
            eps: 0.05,
            batch_size: 50,
            epochs: 0,
            eval_interval: 10,
            save_interval: 10,
            backup_interval: 50,
            model_dir: None,
            buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

impl TrainerConfig {
    /// Sets the update scheduling mode.
    pub fn mode(mut self, v: TrainMode) -> Self {
        self.mode = v;
        self
    }

    /// Sets the discount factor.
    pub fn gamma(mut self, v: f32) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the exploration probability.
    pub fn eps(mut self, v: f32) -> Self {
        self.eps = v;
        self
    }

    /// Sets the number of episodes per batch.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the number of training epochs.
    pub fn epochs(mut self, v: usize) -> Self {
        self.epochs = v;
        self
    }

    /// Sets the interval of evaluation in epochs.
    pub fn eval_interval(mut self, v: usize) -> Self {
        self.eval_interval = v;
        self
    }

    /// Sets the interval of checkpoint saving in epochs.
    pub fn save_interval(mut self, v: usize) -> Self {
        self.save_interval = v;
        self
    }

    /// Sets the interval of numbered backups in epochs.
    pub fn backup_interval(mut self, v: usize) -> Self {
        self.backup_interval = v;
        self
    }

    /// Sets the model directory.
    pub fn model_dir(mut self, v: impl Into<String>) -> Self {
        self.model_dir = Some(v.into());
        self
    }

    /// Sets the k-shot buckets.
    pub fn buckets(mut self, v: &[usize]) -> Self {
        self.buckets = v.to_vec();
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`] as YAML file.
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
        let dir = TempDir::new("trainer_config").unwrap();
        let path = dir.path().join("trainer.yaml");

        let config = TrainerConfig::default()
            .mode(TrainMode::Sequence)
            .epochs(200)
            .batch_size(32)
            .eps(0.1)
            .model_dir("model/seq");
        config.save(&path).unwrap();

        let loaded = TrainerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
