//! Batched transition.
use ndarray::Array2;

/// One decision step for every batch element, `(s, a, s', r)`.
///
/// `next_state` is `None` only at the last timestep of an episode; the TD
/// target then degenerates to the reward alone.
#[derive(Debug, Clone)]
pub struct Transition {
    /// State batch `[batch, input_dim]` the actions were taken in.
    pub state: Array2<f32>,

    /// Chosen action per batch element, in `[0, classes]`.
    pub actions: Vec<usize>,

    /// Following state batch, absent at the episode's terminal step.
    pub next_state: Option<Array2<f32>>,

    /// Reward per batch element.
    pub rewards: Vec<f32>,
}

impl Transition {
    /// Constructs a transition.
    pub fn new(
        state: Array2<f32>,
        actions: Vec<usize>,
        next_state: Option<Array2<f32>>,
        rewards: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(state.nrows(), actions.len());
        debug_assert_eq!(state.nrows(), rewards.len());
        Self {
            state,
            actions,
            next_state,
            rewards,
        }
    }

    /// Number of batch elements in the transition.
    pub fn batch_size(&self) -> usize {
        self.actions.len()
    }

    /// Whether this is the episode's terminal step.
    pub fn is_terminal(&self) -> bool {
        self.next_state.is_none()
    }
}
