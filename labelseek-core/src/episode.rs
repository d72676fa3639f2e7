//! Episode data model and sources.
//!
//! An episode is a fixed-length ordered sequence of labeled samples drawn
//! from a small set of classes, with the dataset's global label ids remapped
//! to a dense `[0, classes)` range scoped to the episode. A batch holds
//! `batch_size` independent episodes advanced in lockstep.
use crate::error::LabelSeekError;
use anyhow::Result;
use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::seq::index;

/// A batch of episodes, time-major.
///
/// `samples[t]` is the `[batch, sample_dim]` input at timestep `t` and
/// `labels[t][b]` the dense episode-scoped label of batch element `b`.
#[derive(Debug, Clone)]
pub struct EpisodeBatch {
    samples: Vec<Array2<f32>>,
    labels: Vec<Vec<usize>>,
}

impl EpisodeBatch {
    /// Constructs a batch, validating the shapes agree.
    pub fn new(samples: Vec<Array2<f32>>, labels: Vec<Vec<usize>>) -> Result<Self, LabelSeekError> {
        if samples.is_empty() || samples.len() != labels.len() {
            return Err(LabelSeekError::ShapeMismatch(format!(
                "{} sample steps vs {} label steps",
                samples.len(),
                labels.len()
            )));
        }
        let batch = samples[0].nrows();
        let dim = samples[0].ncols();
        for (t, (s, l)) in samples.iter().zip(labels.iter()).enumerate() {
            if s.nrows() != batch || s.ncols() != dim || l.len() != batch {
                return Err(LabelSeekError::ShapeMismatch(format!(
                    "inconsistent shapes at timestep {}",
                    t
                )));
            }
        }
        Ok(Self { samples, labels })
    }

    /// Number of timesteps.
    pub fn episode_size(&self) -> usize {
        self.samples.len()
    }

    /// Number of independent episodes advanced in lockstep.
    pub fn batch_size(&self) -> usize {
        self.samples[0].nrows()
    }

    /// Width of a flattened sample.
    pub fn sample_dim(&self) -> usize {
        self.samples[0].ncols()
    }

    /// Sample batch at timestep `t`.
    pub fn samples_at(&self, t: usize) -> &Array2<f32> {
        &self.samples[t]
    }

    /// Labels at timestep `t`, one per batch element.
    pub fn labels_at(&self, t: usize) -> &[usize] {
        &self.labels[t]
    }
}

/// Yields episode batches with per-episode label remapping already applied.
pub trait EpisodeSource {
    /// Draws the next batch of independent episodes.
    fn next_batch(&mut self, batch_size: usize, rng: &mut SmallRng) -> Result<EpisodeBatch>;
}

/// In-memory pool of classes and their samples.
///
/// Samples are binarized on ingest (1 if the value is positive), so every
/// state assembled from the pool satisfies the boolean-sample invariant.
/// Each drawn episode picks `episode_classes` distinct classes, assigns them
/// dense pseudo-labels in draw order, and samples `episode_size` items
/// without replacement from the union of their samples.
#[derive(Debug, Clone)]
pub struct ClassPool {
    classes: Vec<Vec<Array1<f32>>>,
    sample_dim: usize,
    episode_classes: usize,
    episode_size: usize,
}

impl ClassPool {
    /// Constructs an empty pool.
    pub fn new(episode_classes: usize, episode_size: usize, sample_dim: usize) -> Self {
        Self {
            classes: Vec::new(),
            sample_dim,
            episode_classes,
            episode_size,
        }
    }

    /// Adds one class worth of samples, binarizing each.
    pub fn push_class(&mut self, samples: Vec<Array1<f32>>) -> Result<(), LabelSeekError> {
        let mut stored = Vec::with_capacity(samples.len());
        for mut s in samples {
            if s.len() != self.sample_dim {
                return Err(LabelSeekError::ShapeMismatch(format!(
                    "sample of width {} in a pool of width {}",
                    s.len(),
                    self.sample_dim
                )));
            }
            s.mapv_inplace(|v| if v > 0.0 { 1.0 } else { 0.0 });
            stored.push(s);
        }
        self.classes.push(stored);
        Ok(())
    }

    /// Number of classes in the pool.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Classes drawn into each episode.
    pub fn episode_classes(&self) -> usize {
        self.episode_classes
    }

    /// Timesteps per episode.
    pub fn episode_size(&self) -> usize {
        self.episode_size
    }

    /// Width of a flattened sample.
    pub fn sample_dim(&self) -> usize {
        self.sample_dim
    }

    pub(crate) fn class_samples(&self, class: usize) -> &[Array1<f32>] {
        &self.classes[class]
    }

    /// One episode for one batch element: (sample row, dense label) pairs.
    fn draw_episode(&self, rng: &mut SmallRng) -> Result<Vec<(usize, usize, usize)>, LabelSeekError> {
        if self.classes.len() < self.episode_classes {
            return Err(LabelSeekError::EmptyClassPool);
        }
        let chosen = index::sample(rng, self.classes.len(), self.episode_classes);

        // Dense pseudo-labels are assigned in draw order; the draw itself is
        // uniform, so the mapping from dataset class to label slot is too.
        let mut items = Vec::new();
        for (pseudo, class) in chosen.iter().enumerate() {
            for s in 0..self.classes[class].len() {
                items.push((class, s, pseudo));
            }
        }
        if items.len() < self.episode_size {
            return Err(LabelSeekError::EmptyClassPool);
        }
        let picked = index::sample(rng, items.len(), self.episode_size);
        Ok(picked.iter().map(|i| items[i]).collect())
    }
}

impl EpisodeSource for ClassPool {
    fn next_batch(&mut self, batch_size: usize, rng: &mut SmallRng) -> Result<EpisodeBatch> {
        let mut per_element = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            per_element.push(self.draw_episode(rng)?);
        }

        let mut samples = Vec::with_capacity(self.episode_size);
        let mut labels = Vec::with_capacity(self.episode_size);
        for t in 0..self.episode_size {
            let mut step = Array2::zeros((batch_size, self.sample_dim));
            let mut step_labels = Vec::with_capacity(batch_size);
            for (b, episode) in per_element.iter().enumerate() {
                let (class, s, pseudo) = episode[t];
                step.row_mut(b).assign(&self.classes[class][s]);
                step_labels.push(pseudo);
            }
            samples.push(step);
            labels.push(step_labels);
        }
        Ok(EpisodeBatch::new(samples, labels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Pool with `n` classes of `per_class` constant samples each; the
    /// sample value encodes the class id so tests can trace provenance.
    pub(crate) fn toy_pool(n: usize, per_class: usize, classes: usize, episode: usize) -> ClassPool {
        let mut pool = ClassPool::new(classes, episode, 4);
        for c in 0..n {
            let sample = Array1::from_elem(4, (c + 1) as f32);
            pool.push_class(vec![sample; per_class]).unwrap();
        }
        pool
    }

    #[test]
    fn labels_are_dense_and_episode_scoped() {
        let mut pool = toy_pool(10, 4, 3, 6);
        let mut rng = SmallRng::seed_from_u64(3);
        let batch = pool.next_batch(2, &mut rng).unwrap();

        assert_eq!(batch.episode_size(), 6);
        assert_eq!(batch.batch_size(), 2);
        for t in 0..batch.episode_size() {
            for b in 0..batch.batch_size() {
                assert!(batch.labels_at(t)[b] < 3);
            }
        }
    }

    #[test]
    fn samples_are_binarized_on_ingest() {
        let mut pool = ClassPool::new(1, 2, 3);
        pool.push_class(vec![Array1::from(vec![-1.0f32, 0.5, 0.0]); 2])
            .unwrap();
        assert_eq!(pool.class_samples(0)[0].to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn too_small_pool_is_a_configuration_error() {
        let mut pool = toy_pool(2, 1, 3, 6);
        let mut rng = SmallRng::seed_from_u64(4);
        assert!(pool.next_batch(1, &mut rng).is_err());
    }
}
