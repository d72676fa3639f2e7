//! Train a [`QAgent`] on few-shot labeling episodes.
//!
//! # Training loop
//!
//! One *epoch* consumes one episode batch:
//!
//! 0. Given an agent implementing [`QAgent`] and a recorder implementing
//!    [`AggregateRecorder`].
//! 1. Draw an episode batch from the [`BatchProvider`] (uniformly random
//!    classes, or the hardest classes under the current policy when the
//!    margin sampler is active).
//! 2. Run the episode under the configured [`TrainMode`]:
//!    * [`TrainMode::OnlineTd`]: at every timestep, act epsilon-greedily,
//!      collect the reward, and apply one temporal-difference update; the
//!      hidden state is detached after each update so gradients never span
//!      timesteps.
//!    * [`TrainMode::Sequence`]: run the whole teacher-forced episode and
//!      apply a single supervised update on the summed per-timestep
//!      classification loss.
//! 3. Every `eval_interval` epochs, evaluate on held-out episodes with the
//!    [`Validator`] and save the parameters under `(model_dir)/best` when
//!    the evaluation reward is at least the best seen so far.
//! 4. Every `save_interval` epochs, write the rolling checkpoint
//!    `(model_dir)/checkpoint`; every `backup_interval` epochs, keep a
//!    numbered copy as well. A run resumed from the checkpoint continues
//!    its statistics and histories where they left off.
mod config;

use crate::base::{HiddenState, QAgent, QNetwork, Transition};
use crate::checkpoint::{Checkpoint, TrainingSession};
use crate::episode::{EpisodeBatch, EpisodeSource};
use crate::margin::{CandidateSource, ClassMarginSampler, MarginLog};
use crate::record::{AggregateRecorder, Record, RecordValue::Scalar};
use crate::reward::RewardModel;
use crate::state::StateBuilder;
use crate::stats::{EpisodeSummary, KShotStats};
use crate::util::argmax_rows;
use crate::validator::Validator;
use anyhow::Result;
pub use config::{TrainMode, TrainerConfig};
use log::info;
use ndarray::ArrayView1;
use rand::rngs::SmallRng;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Yields the next training episode batch.
///
/// The policy is passed in because active sampling scores candidates with
/// it; the uniform provider ignores it.
pub trait BatchProvider<Q: QNetwork> {
    /// Draws the next episode batch.
    fn next_batch(
        &mut self,
        policy: &Q,
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Result<EpisodeBatch>;

    /// Margin diagnostics, when this provider performs active sampling.
    fn margin_log(&self) -> Option<&MarginLog> {
        None
    }
}

/// Uniformly random episodes from an [`EpisodeSource`].
pub struct RandomEpisodes<S: EpisodeSource>(pub S);

impl<S: EpisodeSource, Q: QNetwork> BatchProvider<Q> for RandomEpisodes<S> {
    fn next_batch(
        &mut self,
        _policy: &Q,
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Result<EpisodeBatch> {
        self.0.next_batch(batch_size, rng)
    }
}

/// Episodes assembled from the lowest-margin candidate classes.
pub struct MarginEpisodes<C: CandidateSource> {
    source: C,
    sampler: ClassMarginSampler,
    cms: usize,
}

impl<C: CandidateSource> MarginEpisodes<C> {
    /// Constructs the provider, drawing `cms` candidates per pool.
    pub fn new(source: C, sampler: ClassMarginSampler, cms: usize) -> Self {
        Self {
            source,
            sampler,
            cms,
        }
    }

    /// Access to the sampler, e.g. to restore its log from a checkpoint.
    pub fn sampler_mut(&mut self) -> &mut ClassMarginSampler {
        &mut self.sampler
    }
}

impl<C: CandidateSource, Q: QNetwork> BatchProvider<Q> for MarginEpisodes<C> {
    fn next_batch(
        &mut self,
        policy: &Q,
        batch_size: usize,
        rng: &mut SmallRng,
    ) -> Result<EpisodeBatch> {
        let pool = self.source.next_pool(self.cms, batch_size, rng)?;
        self.sampler.sample(&pool, policy, rng)
    }

    fn margin_log(&self) -> Option<&MarginLog> {
        Some(&self.sampler.log)
    }
}

/// Manages the training loop and related objects.
pub struct EpisodeTrainer {
    config: TrainerConfig,
    reward: RewardModel,
    state: StateBuilder,
}

impl EpisodeTrainer {
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig, reward: RewardModel) -> Self {
        let state = StateBuilder::new(reward.classes());
        Self {
            config,
            reward,
            state,
        }
    }

    /// The trainer's configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Runs one training episode batch under the configured mode.
    pub fn train_episode<A>(
        &self,
        agent: &mut A,
        batch: &EpisodeBatch,
        stats: &mut KShotStats,
        rng: &mut SmallRng,
    ) -> Result<EpisodeSummary>
    where
        A: QAgent,
        A::Hidden: Clone,
    {
        match self.config.mode {
            TrainMode::OnlineTd => self.train_episode_td(agent, batch, stats, rng),
            TrainMode::Sequence => self.train_episode_seq(agent, batch, stats),
        }
    }

    /// Per-timestep temporal-difference training.
    ///
    /// Gradients are cut at every optimization boundary: the update sees
    /// only the current transition and the hidden state carried into it, and
    /// the hidden state is detached before the next timestep.
    fn train_episode_td<A: QAgent>(
        &self,
        agent: &mut A,
        batch: &EpisodeBatch,
        stats: &mut KShotStats,
        rng: &mut SmallRng,
    ) -> Result<EpisodeSummary> {
        let batch_size = batch.batch_size();
        let episode_size = batch.episode_size();
        let mut hidden = agent.reset_hidden(batch_size);
        let mut signal = self.state.initial_signal(batch_size);
        let mut counts: Vec<HashMap<usize, usize>> = vec![HashMap::new(); batch_size];
        let mut summary = EpisodeSummary::default();
        stats.begin_episode();

        for t in 0..episode_size {
            let labels = batch.labels_at(t);
            let state = self.state.build(&signal, batch.samples_at(t));
            let (q, next_hidden) = agent.forward(&state, &hidden);

            let greedy = argmax_rows(q.view());
            let actions = self.reward.explore(&greedy, labels, self.config.eps, rng);
            let one_hot = self.state.one_hot(labels);
            let rewards = self.reward.collect_reward_batch(&actions, &one_hot);

            for b in 0..batch_size {
                let k = occurrence(&mut counts[b], labels[b]);
                let outcome = self.reward.outcome(rewards[b]);
                stats.record(k, outcome);
                summary.observe(outcome);
            }
            summary.reward += rewards.iter().sum::<f32>() / batch_size as f32;

            let next_signal = self.reward.next_signal_batch(&actions, &one_hot);
            let next_state = if t + 1 < episode_size {
                Some(self.state.build(&next_signal, batch.samples_at(t + 1)))
            } else {
                None
            };

            let transition = Transition::new(state, actions, next_state, rewards);
            summary.loss += agent.td_step(&transition, &hidden, self.config.gamma)?;

            hidden = next_hidden.detach();
            signal = next_signal;
        }

        Ok(summary)
    }

    /// End-of-episode supervised sequence training.
    ///
    /// The label signal is teacher-forced (always the previous ground
    /// truth), decisions are pure class argmax with no request action, and
    /// one update is applied on the summed sequence loss.
    fn train_episode_seq<A>(
        &self,
        agent: &mut A,
        batch: &EpisodeBatch,
        stats: &mut KShotStats,
    ) -> Result<EpisodeSummary>
    where
        A: QAgent,
        A::Hidden: Clone,
    {
        let batch_size = batch.batch_size();
        let episode_size = batch.episode_size();
        let labels: Vec<Vec<usize>> = (0..episode_size)
            .map(|t| batch.labels_at(t).to_vec())
            .collect();
        let signals = self.state.teacher_forced_signals(&labels);
        let states: Vec<_> = (0..episode_size)
            .map(|t| self.state.build(&signals[t], batch.samples_at(t)))
            .collect();

        // Decisions are taken with the pre-update parameters, then the
        // single sequence update is applied.
        let hidden = agent.reset_hidden(batch_size);
        let (outputs, _) = agent.forward_seq(&states, &hidden);

        let mut counts: Vec<HashMap<usize, usize>> = vec![HashMap::new(); batch_size];
        let mut summary = EpisodeSummary::default();
        stats.begin_episode();

        for (t, q) in outputs.iter().enumerate() {
            let step_labels = &labels[t];
            let one_hot = self.state.one_hot(step_labels);
            let actions: Vec<usize> = (0..batch_size)
                .map(|b| class_argmax(q.row(b), self.reward.classes()))
                .collect();
            let rewards = self.reward.collect_reward_batch(&actions, &one_hot);

            for b in 0..batch_size {
                let k = occurrence(&mut counts[b], step_labels[b]);
                let outcome = self.reward.outcome(rewards[b]);
                stats.record(k, outcome);
                summary.observe(outcome);
            }
            summary.reward += rewards.iter().sum::<f32>() / batch_size as f32;
        }

        summary.loss = agent.seq_step(&states, &labels)?;
        Ok(summary)
    }

    /// Train the agent.
    ///
    /// Resumable: pass a [`TrainingSession`] restored from a checkpoint to
    /// continue a run, or a fresh one to start from scratch.
    pub fn fit<A, B>(
        &self,
        agent: &mut A,
        provider: &mut B,
        eval_source: &mut dyn EpisodeSource,
        session: &mut TrainingSession,
        recorder: &mut dyn AggregateRecorder,
        rng: &mut SmallRng,
    ) -> Result<()>
    where
        A: QAgent,
        A::Hidden: Clone,
        B: BatchProvider<A>,
    {
        let validator = Validator::with_model(self.reward.clone());
        let base_elapsed = session.elapsed_secs;
        let timer = SystemTime::now();

        // A fresh session takes its k-shot buckets from the configuration;
        // a resumed one keeps the buckets it was checkpointed with.
        if session.epoch == 0 && session.train_stats.episodes() == 0 {
            session.train_stats = KShotStats::new(&self.config.buckets);
            session.test_stats = KShotStats::new(&self.config.buckets);
        }
        agent.train();

        while session.epoch < self.config.epochs {
            let epoch = session.epoch + 1;
            let batch = provider.next_batch(agent, self.config.batch_size, rng)?;
            let summary = self.train_episode(agent, &batch, &mut session.train_stats, rng)?;
            session.epoch = epoch;
            session.episode += batch.batch_size();

            let avg_reward = summary.reward / batch.episode_size() as f32;
            session.history.accuracy.push(summary.total_accuracy());
            session
                .history
                .prediction_accuracy
                .push(summary.prediction_accuracy());
            session.history.requests.push(summary.request_percentage());
            session.history.loss.push(summary.loss);
            session.history.reward.push(avg_reward);

            let mut record = Record::from_slice(&[
                (
                    "training_total_requests",
                    Scalar(summary.request_percentage()),
                ),
                ("training_total_accuracy", Scalar(summary.total_accuracy())),
                ("training_total_loss", Scalar(summary.loss)),
                ("training_average_reward", Scalar(avg_reward)),
            ]);

            if epoch % self.config.eval_interval == 0 {
                info!("Starts evaluation of the trained model");
                agent.eval();
                let eval_batch = eval_source.next_batch(self.config.batch_size, rng)?;
                let eval = validator.validate(agent, &eval_batch, &mut session.test_stats)?;
                agent.train();

                let eval_avg = eval.reward / eval_batch.episode_size() as f32;
                session.history.test_accuracy.push(eval.total_accuracy());
                session
                    .history
                    .test_prediction_accuracy
                    .push(eval.prediction_accuracy());
                session.history.test_requests.push(eval.request_percentage());
                session.history.test_reward.push(eval_avg);

                record.insert("test_total_requests", Scalar(eval.request_percentage()));
                record.insert("test_total_accuracy", Scalar(eval.total_accuracy()));
                record.insert("test_average_reward", Scalar(eval_avg));

                // Ties go to the newer parameters.
                if eval.reward >= session.best_reward {
                    session.best_reward = eval.reward;
                    if let Some(dir) = &self.config.model_dir {
                        fs::create_dir_all(dir)?;
                        agent.save_params(&Path::new(dir).join("best"))?;
                        info!("Saved the best model in {:?}.", dir);
                    }
                }
            }

            if let Some(log) = provider.margin_log() {
                session.margin_log = log.clone();
            }

            if let Some(dir) = &self.config.model_dir {
                let save = epoch % self.config.save_interval == 0;
                let backup = epoch % self.config.backup_interval == 0;
                if save || backup {
                    session.elapsed_secs = base_elapsed + timer.elapsed()?.as_secs_f64();
                    fs::create_dir_all(dir)?;
                    let ckpt = Checkpoint {
                        session: session.clone(),
                        params: agent.params(),
                    };
                    if save {
                        ckpt.save(Path::new(dir).join("checkpoint"))?;
                    }
                    if backup {
                        ckpt.save(Path::new(dir).join(format!("backup_{}", epoch)))?;
                    }
                }
            }

            recorder.store(record);
            if epoch % self.config.eval_interval == 0 {
                recorder.flush(epoch as _);
            }
        }

        session.elapsed_secs = base_elapsed + timer.elapsed()?.as_secs_f64();
        Ok(())
    }
}

fn occurrence(counts: &mut HashMap<usize, usize>, label: usize) -> usize {
    let c = counts.entry(label).or_insert(0);
    *c += 1;
    *c
}

fn class_argmax(q: ArrayView1<f32>, classes: usize) -> usize {
    let mut best = 0;
    let mut best_v = f32::NEG_INFINITY;
    for (i, v) in q.iter().take(classes).enumerate() {
        if *v > best_v {
            best_v = *v;
            best = i;
        }
    }
    best
}
