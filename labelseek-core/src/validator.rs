//! Greedy evaluation of a policy on held-out episodes.
use crate::base::QNetwork;
use crate::episode::EpisodeBatch;
use crate::reward::RewardModel;
use crate::state::{ClassCodes, StateBuilder};
use crate::stats::{EpisodeSummary, KShotStats};
use crate::util::argmax_rows;
use anyhow::Result;
use ndarray::Array2;
use std::collections::HashMap;

/// Runs episodes through a policy with pure argmax action selection.
///
/// No exploration, no parameter updates, no hidden-state carryover between
/// episode batches. Validation episodes use the same observe, decide,
/// reward, transition cycle as training, so a request still reveals the true
/// label at the small request reward.
pub struct Validator {
    reward: RewardModel,
    state: StateBuilder,
}

impl Validator {
    /// Constructs a validator for episodes over the given number of classes.
    pub fn new(classes: usize) -> Self {
        Self::with_model(RewardModel::new(classes))
    }

    /// Constructs a validator sharing a custom reward model, so evaluation
    /// rewards stay comparable with training rewards.
    pub fn with_model(reward: RewardModel) -> Self {
        let state = StateBuilder::new(reward.classes());
        Self { reward, state }
    }

    /// Evaluates one episode batch, updating the k-shot accumulator and
    /// returning the aggregate counters.
    ///
    /// The policy is taken by shared reference; validation never mutates it.
    pub fn validate<Q: QNetwork>(
        &self,
        policy: &Q,
        batch: &EpisodeBatch,
        stats: &mut KShotStats,
    ) -> Result<EpisodeSummary> {
        let batch_size = batch.batch_size();
        let mut hidden = policy.reset_hidden(batch_size);
        let mut signal = self.state.initial_signal(batch_size);
        let mut counts: Vec<HashMap<usize, usize>> = vec![HashMap::new(); batch_size];
        let mut summary = EpisodeSummary::default();
        stats.begin_episode();

        for t in 0..batch.episode_size() {
            let labels = batch.labels_at(t);
            let input = self.state.build(&signal, batch.samples_at(t));
            let (q, next_hidden) = policy.forward(&input, &hidden);
            hidden = next_hidden;

            let actions = argmax_rows(q.view());
            let one_hot = self.state.one_hot(labels);
            let rewards = self.reward.collect_reward_batch(&actions, &one_hot);

            for b in 0..batch_size {
                let k = {
                    let c = counts[b].entry(labels[b]).or_insert(0);
                    *c += 1;
                    *c
                };
                let outcome = self.reward.outcome(rewards[b]);
                stats.record(k, outcome);
                summary.observe(outcome);
            }
            summary.reward += rewards.iter().sum::<f32>() / batch_size as f32;

            signal = self.reward.next_signal_batch(&actions, &one_hot);
        }

        Ok(summary)
    }

    /// Evaluates one episode batch in multi-label mode.
    ///
    /// Same loop as [`validate`](Self::validate), except the label signal is
    /// each batch element's random code for the class instead of a one-hot:
    /// the episode starts from the zero signal and a request reveals the
    /// true label's code. `codes` are the ones generated for this episode.
    pub fn validate_multilabel<Q: QNetwork>(
        &self,
        policy: &Q,
        batch: &EpisodeBatch,
        codes: &ClassCodes,
        stats: &mut KShotStats,
    ) -> Result<EpisodeSummary> {
        let batch_size = batch.batch_size();
        let mut hidden = policy.reset_hidden(batch_size);
        let mut signal = Array2::zeros((batch_size, codes.dim()));
        let mut counts: Vec<HashMap<usize, usize>> = vec![HashMap::new(); batch_size];
        let mut summary = EpisodeSummary::default();
        stats.begin_episode();

        for t in 0..batch.episode_size() {
            let labels = batch.labels_at(t);
            let input = self.state.build(&signal, batch.samples_at(t));
            let (q, next_hidden) = policy.forward(&input, &hidden);
            hidden = next_hidden;

            let actions = argmax_rows(q.view());
            let rewards = self.reward.collect_reward_multilabel_batch(&actions, labels);

            for b in 0..batch_size {
                let k = {
                    let c = counts[b].entry(labels[b]).or_insert(0);
                    *c += 1;
                    *c
                };
                let outcome = self.reward.outcome(rewards[b]);
                stats.record(k, outcome);
                summary.observe(outcome);
            }
            summary.reward += rewards.iter().sum::<f32>() / batch_size as f32;

            signal = self
                .reward
                .next_multilabel_signal_batch(&actions, labels, codes);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::HiddenState;
    use crate::episode::EpisodeBatch;
    use ndarray::Array2;

    struct StubHidden;

    impl HiddenState for StubHidden {
        fn detach(self) -> Self {
            self
        }
    }

    /// Always prefers the fixed action, whatever the input.
    struct ConstantPolicy {
        action: usize,
        classes: usize,
        input_dim: usize,
    }

    impl QNetwork for ConstantPolicy {
        type Hidden = StubHidden;

        fn reset_hidden(&self, _batch_size: usize) -> StubHidden {
            StubHidden
        }

        fn forward(&self, input: &Array2<f32>, _h: &StubHidden) -> (Array2<f32>, StubHidden) {
            let mut q = Array2::zeros((input.nrows(), self.classes + 1));
            q.column_mut(self.action).fill(1.0);
            (q, StubHidden)
        }

        fn input_dim(&self) -> usize {
            self.input_dim
        }

        fn num_actions(&self) -> usize {
            self.classes + 1
        }
    }

    fn two_class_batch() -> EpisodeBatch {
        // Labels over four timesteps: 0, 1, 0, 0.
        let samples = vec![Array2::from_elem((1, 3), 1.0); 4];
        let labels = vec![vec![0], vec![1], vec![0], vec![0]];
        EpisodeBatch::new(samples, labels).unwrap()
    }

    #[test]
    fn always_predicting_class_zero_scores_the_zero_labels() {
        let validator = Validator::new(2);
        let policy = ConstantPolicy {
            action: 0,
            classes: 2,
            input_dim: 5,
        };
        let mut stats = KShotStats::new(&[1, 2]);
        let summary = validator
            .validate(&policy, &two_class_batch(), &mut stats)
            .unwrap();

        assert_eq!(summary.predict, 4.0);
        assert_eq!(summary.correct, 3.0);
        assert_eq!(summary.requests, 0.0);
        assert_eq!(summary.request_percentage(), 0.0);
        assert_eq!(summary.total_accuracy(), 75.0);
        // First exposures: class 0 correct, class 1 wrong.
        assert_eq!(stats.accuracy_entries(1).unwrap()[0], vec![1, 0]);
        assert_eq!(stats.accuracy_entries(2).unwrap()[0], vec![1]);
    }

    #[test]
    fn always_requesting_pays_the_request_reward_everywhere() {
        let validator = Validator::new(2);
        let policy = ConstantPolicy {
            action: 2,
            classes: 2,
            input_dim: 5,
        };
        let mut stats = KShotStats::default();
        let summary = validator
            .validate(&policy, &two_class_batch(), &mut stats)
            .unwrap();

        assert_eq!(summary.requests, 4.0);
        assert_eq!(summary.request_percentage(), 100.0);
        assert!((summary.reward - 4.0 * crate::reward::DEFAULT_REQUEST_REWARD).abs() < 1e-6);
    }

    #[test]
    fn multilabel_validation_scores_like_the_one_hot_path() {
        use rand::{rngs::SmallRng, SeedableRng};

        let validator = Validator::new(2);
        let policy = ConstantPolicy {
            action: 0,
            classes: 2,
            input_dim: 12,
        };
        let batch = two_class_batch();
        let mut rng = SmallRng::seed_from_u64(9);
        let codes = ClassCodes::generate(1, 2, 3, &mut rng);

        let mut stats = KShotStats::new(&[1, 2]);
        let summary = validator
            .validate_multilabel(&policy, &batch, &codes, &mut stats)
            .unwrap();

        // A never-requesting policy scores identically in both modes; only
        // the signal encoding differs.
        let mut one_hot_stats = KShotStats::new(&[1, 2]);
        let one_hot = validator
            .validate(&policy, &batch, &mut one_hot_stats)
            .unwrap();
        assert_eq!(summary, one_hot);
        assert_eq!(stats, one_hot_stats);
    }

    #[test]
    fn multilabel_requests_pay_the_request_reward() {
        use rand::{rngs::SmallRng, SeedableRng};

        let validator = Validator::new(2);
        let policy = ConstantPolicy {
            action: 2,
            classes: 2,
            input_dim: 12,
        };
        let mut rng = SmallRng::seed_from_u64(10);
        let codes = ClassCodes::generate(1, 2, 3, &mut rng);

        let mut stats = KShotStats::default();
        let summary = validator
            .validate_multilabel(&policy, &two_class_batch(), &codes, &mut stats)
            .unwrap();
        assert_eq!(summary.request_percentage(), 100.0);
        assert!((summary.reward - 4.0 * crate::reward::DEFAULT_REQUEST_REWARD).abs() < 1e-6);
    }

    #[test]
    fn validation_is_repeatable() {
        let validator = Validator::new(2);
        let policy = ConstantPolicy {
            action: 1,
            classes: 2,
            input_dim: 5,
        };
        let batch = two_class_batch();
        let mut stats_a = KShotStats::default();
        let mut stats_b = KShotStats::default();

        let first = validator.validate(&policy, &batch, &mut stats_a).unwrap();
        let second = validator.validate(&policy, &batch, &mut stats_b).unwrap();
        assert_eq!(first, second);
        assert_eq!(stats_a, stats_b);
    }
}
