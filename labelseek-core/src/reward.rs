//! Reward and transition model.
//!
//! One decision runs through observe, decide, reward, transition. This
//! module owns the reward function, the label-signal transition and the
//! three-way epsilon-greedy exploration policy; every trainer variant calls
//! into the same implementation.
use crate::error::LabelSeekError;
use crate::state::ClassCodes;
use crate::stats::Outcome;
use crate::util::argmax;
use ndarray::{Array2, ArrayView1};
use rand::{rngs::SmallRng, Rng};

/// Reward for requesting the true label, default −0.05.
pub const DEFAULT_REQUEST_REWARD: f32 = -0.05;
/// Reward for a correct prediction, default +1.
pub const DEFAULT_PREDICTION_REWARD: f32 = 1.0;
/// Reward for an incorrect prediction, default −1.
pub const DEFAULT_INCORRECT_REWARD: f32 = -1.0;

/// The reward function, next-state construction and exploration policy.
///
/// Rewards are a fixed three-valued set with
/// `incorrect < request < correct`, so that requesting stays attractive on
/// first exposure to a class and unattractive once the class is known. The
/// ordering is checked at construction.
#[derive(Debug, Clone)]
pub struct RewardModel {
    classes: usize,
    request_reward: f32,
    prediction_reward: f32,
    incorrect_reward: f32,
}

impl RewardModel {
    /// Constructs the model with the default reward values.
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            request_reward: DEFAULT_REQUEST_REWARD,
            prediction_reward: DEFAULT_PREDICTION_REWARD,
            incorrect_reward: DEFAULT_INCORRECT_REWARD,
        }
    }

    /// Constructs the model with custom reward values.
    ///
    /// Fails fast when `incorrect < request < correct` does not hold.
    pub fn with_rewards(
        classes: usize,
        request: f32,
        correct: f32,
        incorrect: f32,
    ) -> Result<Self, LabelSeekError> {
        if !(incorrect < request && request < correct) {
            return Err(LabelSeekError::InvalidRewardOrder {
                request,
                correct,
                incorrect,
            });
        }
        Ok(Self {
            classes,
            request_reward: request,
            prediction_reward: correct,
            incorrect_reward: incorrect,
        })
    }

    /// Number of classes per episode.
    pub fn classes(&self) -> usize {
        self.classes
    }

    /// The action index meaning "request the true label".
    pub fn request_action(&self) -> usize {
        self.classes
    }

    /// Reward paid for a request.
    pub fn request_reward(&self) -> f32 {
        self.request_reward
    }

    /// Reward for a correct prediction.
    pub fn prediction_reward(&self) -> f32 {
        self.prediction_reward
    }

    /// Reward for an incorrect prediction.
    pub fn incorrect_reward(&self) -> f32 {
        self.incorrect_reward
    }

    /// Reward for one action against the one-hot true label.
    ///
    /// Pure function: the same `(action, label)` always yields the same
    /// value, one of exactly three.
    pub fn collect_reward(&self, action: usize, true_label: ArrayView1<f32>) -> f32 {
        if action == self.request_action() {
            self.request_reward
        } else if action == argmax(true_label) {
            self.prediction_reward
        } else {
            self.incorrect_reward
        }
    }

    /// [`collect_reward`](Self::collect_reward) over a batch.
    pub fn collect_reward_batch(&self, actions: &[usize], true_labels: &Array2<f32>) -> Vec<f32> {
        debug_assert_eq!(actions.len(), true_labels.nrows());
        actions
            .iter()
            .enumerate()
            .map(|(b, a)| self.collect_reward(*a, true_labels.row(b)))
            .collect()
    }

    /// Label signal for the following timestep.
    ///
    /// A request reveals the ground truth, so the next signal is the true
    /// one-hot; any prediction leaves the agent uninformed and the signal
    /// stays zero.
    pub fn next_signal_batch(&self, actions: &[usize], true_labels: &Array2<f32>) -> Array2<f32> {
        debug_assert_eq!(actions.len(), true_labels.nrows());
        let mut signal = Array2::zeros((actions.len(), self.classes));
        for (b, action) in actions.iter().enumerate() {
            if *action == self.request_action() {
                signal.row_mut(b).assign(&true_labels.row(b));
            }
        }
        signal
    }

    /// Reward for one action against a dense label.
    ///
    /// Same three-valued function as [`collect_reward`](Self::collect_reward),
    /// for the multi-label state mode where the signal carries a code rather
    /// than a one-hot and the label stays a plain index.
    pub fn collect_reward_multilabel(&self, action: usize, true_label: usize) -> f32 {
        if action == self.request_action() {
            self.request_reward
        } else if action == true_label {
            self.prediction_reward
        } else {
            self.incorrect_reward
        }
    }

    /// [`collect_reward_multilabel`](Self::collect_reward_multilabel) over a
    /// batch.
    pub fn collect_reward_multilabel_batch(
        &self,
        actions: &[usize],
        true_labels: &[usize],
    ) -> Vec<f32> {
        debug_assert_eq!(actions.len(), true_labels.len());
        actions
            .iter()
            .zip(true_labels.iter())
            .map(|(a, l)| self.collect_reward_multilabel(*a, *l))
            .collect()
    }

    /// Label signal for the following timestep in multi-label mode.
    ///
    /// A request reveals the true label's code; any prediction leaves the
    /// signal zero, exactly as [`next_signal_batch`](Self::next_signal_batch)
    /// does for one-hot signals.
    pub fn next_multilabel_signal_batch(
        &self,
        actions: &[usize],
        true_labels: &[usize],
        codes: &ClassCodes,
    ) -> Array2<f32> {
        debug_assert_eq!(actions.len(), true_labels.len());
        let mut signal = Array2::zeros((actions.len(), codes.dim()));
        for (b, action) in actions.iter().enumerate() {
            if *action == self.request_action() {
                signal.row_mut(b).assign(codes.code(b, true_labels[b]));
            }
        }
        signal
    }

    /// Epsilon-greedy exploration over the three coarse behaviors.
    ///
    /// With probability `1 - eps` the greedy action is kept. Otherwise one
    /// of {request, uniformly-random wrong class, true class} is drawn
    /// uniformly — not a flat epsilon over raw actions. The branch shape is
    /// deliberate for class-imbalanced exploration and is preserved exactly.
    pub fn explore(
        &self,
        greedy: &[usize],
        true_labels: &[usize],
        eps: f32,
        rng: &mut SmallRng,
    ) -> Vec<usize> {
        debug_assert_eq!(greedy.len(), true_labels.len());
        debug_assert!(self.classes >= 2, "exploration needs at least two classes");
        greedy
            .iter()
            .zip(true_labels.iter())
            .map(|(model_action, true_label)| {
                if rng.gen::<f32>() > eps {
                    return *model_action;
                }
                match rng.gen_range(0..3u8) {
                    0 => self.request_action(),
                    1 => {
                        let mut wrong = rng.gen_range(0..self.classes);
                        while wrong == *true_label {
                            wrong = rng.gen_range(0..self.classes);
                        }
                        wrong
                    }
                    _ => *true_label,
                }
            })
            .collect()
    }

    /// Classifies a reward back into the outcome that produced it.
    pub fn outcome(&self, reward: f32) -> Outcome {
        if reward == self.request_reward {
            Outcome::Requested
        } else if reward == self.prediction_reward {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::SeedableRng;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn reward_is_pure_and_three_valued() {
        init();
        let model = RewardModel::new(3);
        let labels = arr2(&[[0.0f32, 1.0, 0.0]]);

        for action in 0..=3 {
            let r1 = model.collect_reward(action, labels.row(0));
            let r2 = model.collect_reward(action, labels.row(0));
            assert_eq!(r1, r2);
            assert!(
                r1 == model.request_reward()
                    || r1 == model.prediction_reward()
                    || r1 == model.incorrect_reward()
            );
        }
        assert_eq!(model.collect_reward(3, labels.row(0)), model.request_reward());
        assert_eq!(model.collect_reward(1, labels.row(0)), model.prediction_reward());
        assert_eq!(model.collect_reward(0, labels.row(0)), model.incorrect_reward());
    }

    #[test]
    fn invalid_reward_order_is_rejected() {
        assert!(RewardModel::with_rewards(3, 1.5, 1.0, -1.0).is_err());
        assert!(RewardModel::with_rewards(3, -2.0, 1.0, -1.0).is_err());
        assert!(RewardModel::with_rewards(3, -0.05, 1.0, -1.0).is_ok());
    }

    #[test]
    fn multilabel_reward_matches_the_one_hot_function() {
        let model = RewardModel::new(3);
        let labels = arr2(&[[0.0f32, 1.0, 0.0]]);
        for action in 0..=3 {
            assert_eq!(
                model.collect_reward_multilabel(action, 1),
                model.collect_reward(action, labels.row(0))
            );
        }
        assert_eq!(
            model.collect_reward_multilabel_batch(&[3, 1, 0], &[0, 1, 2]),
            vec![
                model.request_reward(),
                model.prediction_reward(),
                model.incorrect_reward()
            ]
        );
    }

    #[test]
    fn multilabel_signal_reveals_the_code_only_after_request() {
        let model = RewardModel::new(2);
        let mut rng = SmallRng::seed_from_u64(5);
        let codes = ClassCodes::generate(2, 2, 3, &mut rng);

        // Element 0 requests, element 1 predicts.
        let signal = model.next_multilabel_signal_batch(&[2, 0], &[1, 1], &codes);
        assert_eq!(signal.shape(), &[2, 9]);
        assert_eq!(signal.row(0), codes.code(0, 1).view());
        assert_eq!(signal.row(1).sum(), 0.0);
    }

    #[test]
    fn next_signal_reveals_label_only_after_request() {
        let model = RewardModel::new(2);
        let labels = arr2(&[[1.0f32, 0.0], [0.0, 1.0]]);
        let signal = model.next_signal_batch(&[2, 0], &labels);
        assert_eq!(signal.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(signal.row(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn exploration_with_zero_eps_is_greedy() {
        let model = RewardModel::new(3);
        let mut rng = SmallRng::seed_from_u64(1);
        let greedy = vec![0, 1, 3, 2];
        let actions = model.explore(&greedy, &[1, 1, 0, 2], 0.0, &mut rng);
        assert_eq!(actions, greedy);
    }

    #[test]
    fn exploration_branches_stay_in_action_space() {
        let model = RewardModel::new(3);
        let mut rng = SmallRng::seed_from_u64(2);
        let (mut requests, mut correct, mut wrong) = (0, 0, 0);
        for _ in 0..300 {
            let actions = model.explore(&[0], &[1], 1.0, &mut rng);
            assert!(actions[0] <= 3);
            match actions[0] {
                3 => requests += 1,
                1 => correct += 1,
                _ => wrong += 1,
            }
        }
        // All three coarse behaviors occur under full exploration.
        assert!(requests > 0 && correct > 0 && wrong > 0);
    }
}
