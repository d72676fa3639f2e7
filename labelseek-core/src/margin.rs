//! Class-margin active sampling.
//!
//! Future training episodes are biased toward the classes the current policy
//! finds hardest to discriminate. Every candidate class is probed through
//! the policy network with a fresh hidden state and a label signal distinct
//! from all real classes; the accumulated |top class Q-value| is the class's
//! margin, and the lowest-margin candidates form the next episode.
use crate::base::QNetwork;
use crate::episode::{ClassPool, EpisodeBatch};
use crate::error::LabelSeekError;
use crate::state::StateBuilder;
use anyhow::Result;
use log::debug;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::seq::{index, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// One candidate class: a sequence of sample batches, each `[batch, dim]`.
///
/// Row `b` of slot `s` is the `s`-th representative sample this batch
/// element will see; sources may vary rows per element (e.g. with augmented
/// variants of the class).
#[derive(Debug, Clone)]
pub struct CandidateClass {
    /// Sample batches of this class.
    pub samples: Vec<Array2<f32>>,
}

/// A raw pool of `cms` candidate classes awaiting margin scoring.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    /// The candidates, in pool order (ties in margin resolve to this order).
    pub classes: Vec<CandidateClass>,
}

impl CandidatePool {
    /// Number of candidate classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if the pool holds no candidates.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn batch_size(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|c| c.samples.first())
            .map(|s| s.nrows())
            .next()
            .unwrap_or(0)
    }

    fn sample_dim(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|c| c.samples.first())
            .map(|s| s.ncols())
            .next()
            .unwrap_or(0)
    }
}

/// Yields candidate pools for margin scoring.
pub trait CandidateSource {
    /// Draws `cms` candidate classes with per-batch-element sample variants.
    fn next_pool(
        &mut self,
        cms: usize,
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Result<CandidatePool>;
}

impl CandidateSource for ClassPool {
    fn next_pool(
        &mut self,
        cms: usize,
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Result<CandidatePool> {
        if self.num_classes() < cms {
            return Err(LabelSeekError::EmptyClassPool.into());
        }
        let chosen = index::sample(rng, self.num_classes(), cms);
        let mut classes = Vec::with_capacity(cms);
        for class in chosen.iter() {
            let pool = self.class_samples(class);
            // Each batch element walks the class's samples in its own
            // shuffled order, so probe rows differ across the batch.
            let orders: Vec<Vec<usize>> = (0..batch_size)
                .map(|_| {
                    let mut o: Vec<usize> = (0..pool.len()).collect();
                    o.shuffle(rng);
                    o
                })
                .collect();
            let samples = (0..pool.len())
                .map(|slot| {
                    let mut step = Array2::zeros((batch_size, self.sample_dim()));
                    for b in 0..batch_size {
                        step.row_mut(b).assign(&pool[orders[b][slot]]);
                    }
                    step
                })
                .collect();
            classes.push(CandidateClass { samples });
        }
        Ok(CandidatePool { classes })
    }
}

/// Diagnostic buffers accumulated across sampling passes.
///
/// Persisted in checkpoints so a resumed run continues the same series.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarginLog {
    /// Batch-mean maximum accumulated margin per pass.
    pub all_margins: Vec<f32>,
    /// Batch-mean minimum accumulated margin per pass.
    pub low_margins: Vec<f32>,
    /// Mean Q-value per action over the probe forwards of each pass.
    pub all_choices: Vec<Vec<f32>>,
}

/// Scores candidate classes by decision margin and assembles episodes from
/// the hardest ones.
pub struct ClassMarginSampler {
    classes: usize,
    margin_time: usize,
    samples_per_class: usize,
    state: StateBuilder,
    /// Diagnostic series, checkpointed and restored across runs.
    pub log: MarginLog,
}

impl ClassMarginSampler {
    /// Constructs a sampler selecting `classes` classes per episode, probing
    /// each candidate with `margin_time` samples.
    pub fn new(classes: usize, margin_time: usize) -> Self {
        Self {
            classes,
            margin_time,
            samples_per_class: 10,
            state: StateBuilder::new(classes),
            log: MarginLog::default(),
        }
    }

    /// Sets how many samples of each selected class enter the episode.
    pub fn samples_per_class(mut self, v: usize) -> Self {
        self.samples_per_class = v;
        self
    }

    /// Episode length the sampler produces.
    pub fn episode_size(&self) -> usize {
        self.classes * self.samples_per_class
    }

    /// Scores the pool with the current policy and builds one episode batch
    /// from the lowest-margin classes.
    pub fn sample<Q: QNetwork>(
        &mut self,
        pool: &CandidatePool,
        policy: &Q,
        rng: &mut SmallRng,
    ) -> Result<EpisodeBatch> {
        debug_assert!(pool.len() >= self.classes, "candidate pool smaller than an episode");
        let batch_size = pool.batch_size();
        let margins = self.score(pool, policy, batch_size, rng);
        let selected = self.select(&margins, batch_size);
        self.push_diagnostics(&margins, batch_size);
        self.assemble(pool, &selected, batch_size, rng)
    }

    /// Accumulated |top class Q-value| per (candidate, batch element).
    ///
    /// Each candidate gets a fresh hidden state and a probe label drawn from
    /// `[0, classes]`; the value `classes` yields the zero signal, so the
    /// probe is never a real label the network could special-case.
    /// Candidates with fewer than `margin_time` samples are probed only as
    /// far as their samples allow.
    fn score<Q: QNetwork>(
        &mut self,
        pool: &CandidatePool,
        policy: &Q,
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Array2<f32> {
        let mut margins = Array2::zeros((pool.len(), batch_size));
        let mut choice_sums = vec![0f32; self.classes + 1];
        let mut forwards = 0usize;

        for (c, candidate) in pool.classes.iter().enumerate() {
            let mut hidden = policy.reset_hidden(batch_size);
            let probe_label = rng.gen_range(0..=self.classes);
            let mut signal = self.state.initial_signal(batch_size);

            for sample in candidate.samples.iter().take(self.margin_time) {
                let input = self.state.build(&signal, sample);
                let (q, next_hidden) = policy.forward(&input, &hidden);
                hidden = next_hidden;

                for b in 0..batch_size {
                    let top = q
                        .row(b)
                        .iter()
                        .take(self.classes)
                        .fold(f32::NEG_INFINITY, |a, v| a.max(*v));
                    margins[[c, b]] += top.abs();
                }
                for (a, sum) in choice_sums.iter_mut().enumerate() {
                    *sum += q.column(a).sum();
                }
                forwards += batch_size;
                signal = self.state.probe_signal(batch_size, probe_label);
            }
        }

        if forwards > 0 {
            for sum in choice_sums.iter_mut() {
                *sum /= forwards as f32;
            }
        }
        self.log.all_choices.push(choice_sums);
        margins
    }

    /// Per batch element, the `classes` lowest-margin candidate indices,
    /// ascending. The sort is stable, so margin ties resolve to pool order.
    fn select(&self, margins: &Array2<f32>, batch_size: usize) -> Vec<Vec<usize>> {
        (0..batch_size)
            .map(|b| {
                let mut order: Vec<usize> = (0..margins.nrows()).collect();
                order.sort_by(|&i, &j| {
                    margins[[i, b]]
                        .partial_cmp(&margins[[j, b]])
                        .unwrap_or(Ordering::Equal)
                });
                order.truncate(self.classes);
                order
            })
            .collect()
    }

    fn push_diagnostics(&mut self, margins: &Array2<f32>, batch_size: usize) {
        if batch_size == 0 || margins.nrows() == 0 {
            return;
        }
        let mut max_sum = 0f32;
        let mut min_sum = 0f32;
        for b in 0..batch_size {
            let col = margins.column(b);
            max_sum += col.iter().fold(f32::NEG_INFINITY, |a, v| a.max(*v));
            min_sum += col.iter().fold(f32::INFINITY, |a, v| a.min(*v));
        }
        let mean_max = max_sum / batch_size as f32;
        let mean_min = min_sum / batch_size as f32;
        debug!("margin pass: mean max {}, mean min {}", mean_max, mean_min);
        self.log.all_margins.push(mean_max);
        self.log.low_margins.push(mean_min);
    }

    /// Builds the episode: per batch element, `samples_per_class` draws of
    /// each selected class, shuffled into one stream, with pseudo-labels
    /// assigned first-seen from a fresh random permutation so hardness rank
    /// and label index stay decoupled.
    fn assemble(
        &self,
        pool: &CandidatePool,
        selected: &[Vec<usize>],
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Result<EpisodeBatch> {
        let episode_size = self.episode_size();
        let dim = pool.sample_dim();
        let mut samples: Vec<Array2<f32>> = (0..episode_size)
            .map(|_| Array2::zeros((batch_size, dim)))
            .collect();
        let mut labels = vec![vec![0usize; batch_size]; episode_size];

        for (b, chosen) in selected.iter().enumerate() {
            let mut stream: Vec<(usize, usize)> = Vec::with_capacity(episode_size);
            for &candidate in chosen {
                let available = pool.classes[candidate].samples.len();
                if available >= self.samples_per_class {
                    for s in index::sample(rng, available, self.samples_per_class) {
                        stream.push((candidate, s));
                    }
                } else {
                    // Degenerate candidate: too few samples, draw with
                    // replacement rather than failing the pass.
                    for _ in 0..self.samples_per_class {
                        stream.push((candidate, rng.gen_range(0..available)));
                    }
                }
            }
            stream.shuffle(rng);

            let mut perm: Vec<usize> = (0..self.classes).collect();
            perm.shuffle(rng);
            let mut assigned: HashMap<usize, usize> = HashMap::new();
            let mut next = 0usize;

            for (t, (candidate, s)) in stream.into_iter().enumerate() {
                let pseudo = *assigned.entry(candidate).or_insert_with(|| {
                    let p = perm[next];
                    next += 1;
                    p
                });
                samples[t]
                    .row_mut(b)
                    .assign(&pool.classes[candidate].samples[s].row(b));
                labels[t][b] = pseudo;
            }
        }

        Ok(EpisodeBatch::new(samples, labels)?)
    }
}
