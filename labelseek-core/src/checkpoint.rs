//! Session persistence.
//!
//! A training run is resumable: everything the fit loop accumulates beyond
//! the network parameters (epoch counters, k-shot statistics, metric
//! histories, margin diagnostics, the best evaluation reward) lives in a
//! [`TrainingSession`], and a [`Checkpoint`] bundles the session with a
//! parameter snapshot into a single bincode file.
use crate::margin::MarginLog;
use crate::stats::KShotStats;
use anyhow::Result;
use log::{info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Per-epoch metric series, one entry per training epoch (train series) or
/// evaluation pass (test series).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingHistory {
    /// Overall training accuracy per epoch, in percent.
    pub accuracy: Vec<f32>,
    /// Training accuracy among actual predictions per epoch, in percent.
    pub prediction_accuracy: Vec<f32>,
    /// Percentage of label requests per epoch.
    pub requests: Vec<f32>,
    /// Optimization loss per epoch.
    pub loss: Vec<f32>,
    /// Average reward per decision per epoch: the batch-mean episode reward
    /// sum divided by `episode_size`. Runs trained with different episode
    /// sizes stay comparable on this scale; multiply by the episode size to
    /// recover the raw per-episode sum.
    pub reward: Vec<f32>,
    /// Overall evaluation accuracy per evaluation pass, in percent.
    pub test_accuracy: Vec<f32>,
    /// Evaluation accuracy among actual predictions per pass, in percent.
    pub test_prediction_accuracy: Vec<f32>,
    /// Percentage of label requests per evaluation pass.
    pub test_requests: Vec<f32>,
    /// Average reward per decision per evaluation pass, on the same
    /// per-decision scale as [`reward`](Self::reward).
    pub test_reward: Vec<f32>,
}

/// Mutable state of a training run, minus the network parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSession {
    /// Completed training epochs.
    pub epoch: usize,
    /// Episodes consumed so far, over all batch elements.
    pub episode: usize,
    /// Wall-clock seconds spent training, across resumes.
    pub elapsed_secs: f64,
    /// K-shot statistics of the training episodes.
    pub train_stats: KShotStats,
    /// K-shot statistics of the evaluation episodes.
    pub test_stats: KShotStats,
    /// Per-epoch metric series.
    pub history: TrainingHistory,
    /// Margin-sampler diagnostics, when active sampling is in use.
    pub margin_log: MarginLog,
    /// Best evaluation reward seen so far.
    pub best_reward: f32,
}

impl Default for TrainingSession {
    fn default() -> Self {
        Self {
            epoch: 0,
            episode: 0,
            elapsed_secs: 0.0,
            train_stats: KShotStats::default(),
            test_stats: KShotStats::default(),
            history: TrainingHistory::default(),
            margin_log: MarginLog::default(),
            best_reward: f32::MIN,
        }
    }
}

impl TrainingSession {
    /// Fresh session tracking the given k-shot buckets.
    pub fn new(buckets: &[usize]) -> Self {
        Self {
            train_stats: KShotStats::new(buckets),
            test_stats: KShotStats::new(buckets),
            ..Default::default()
        }
    }
}

/// A resumable snapshot: session state plus network parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<P> {
    /// Everything the fit loop accumulates besides the parameters.
    pub session: TrainingSession,
    /// Network parameter snapshot.
    pub params: P,
}

impl<P: Serialize + DeserializeOwned> Checkpoint<P> {
    /// Writes the checkpoint to a single bincode file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        info!("Saved checkpoint in {:?}.", path.as_ref());
        Ok(())
    }

    /// Reads a checkpoint back.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let ckpt = bincode::deserialize_from(BufReader::new(file))?;
        Ok(ckpt)
    }

    /// Resumes from `path` when the file exists; a missing checkpoint is not
    /// an error, the run simply starts from scratch.
    pub fn resume(path: impl AsRef<Path>) -> Result<Option<Self>> {
        if !path.as_ref().exists() {
            warn!(
                "No checkpoint at {:?}, starting from scratch.",
                path.as_ref()
            );
            return Ok(None);
        }
        Ok(Some(Self::load(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn checkpoint_round_trips_through_disk() {
        let dir = TempDir::new("checkpoint").unwrap();
        let path = dir.path().join("checkpoint");

        let mut session = TrainingSession::new(&[1, 2]);
        session.epoch = 7;
        session.episode = 224;
        session.best_reward = 3.25;
        session.history.loss.push(0.5);
        session.margin_log.all_margins.push(1.5);
        let ckpt = Checkpoint {
            session,
            params: vec![1.0f32, -2.0, 0.25],
        };
        ckpt.save(&path).unwrap();

        let restored: Checkpoint<Vec<f32>> = Checkpoint::load(&path).unwrap();
        assert_eq!(restored.session, ckpt.session);
        assert_eq!(restored.params, ckpt.params);
    }

    #[test]
    fn missing_checkpoint_resumes_as_fresh() {
        let dir = TempDir::new("checkpoint").unwrap();
        let resumed: Option<Checkpoint<Vec<f32>>> =
            Checkpoint::resume(dir.path().join("absent")).unwrap();
        assert!(resumed.is_none());
    }
}
