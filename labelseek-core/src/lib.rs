#![warn(missing_docs)]
//! Episode-based reinforcement learning for few-shot classification.
//!
//! An agent observes a stream of samples one at a time. At every timestep it
//! either *requests* the true label, paying a small cost for a guaranteed
//! signal, or *predicts* a class, earning a reward if correct and a penalty
//! if wrong. This crate provides the episode training loop, the reward and
//! transition model, the validator, k-shot statistics and the class-margin
//! active sampler; the recurrent Q-network behind them is opaque and enters
//! only through the traits in [`base`].
//!
//! [`base`]: crate::base
pub mod checkpoint;
pub mod error;
pub mod record;

mod base;
pub use base::{HiddenState, QAgent, QNetwork, Transition};

mod episode;
pub use episode::{ClassPool, EpisodeBatch, EpisodeSource};

mod state;
pub use state::{binarize, ClassCodes, StateBuilder};

mod reward;
pub use reward::RewardModel;

mod stats;
pub use stats::{EpisodeSummary, KShotStats, Outcome};

mod margin;
pub use margin::{CandidateClass, CandidatePool, CandidateSource, ClassMarginSampler, MarginLog};

mod trainer;
pub use trainer::{
    BatchProvider, EpisodeTrainer, MarginEpisodes, RandomEpisodes, TrainMode, TrainerConfig,
};

mod validator;
pub use validator::Validator;

mod util;
pub use util::argmax;
