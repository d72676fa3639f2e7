//! Errors in the library.
use thiserror::Error;

/// Errors raised by this library.
///
/// Sampling degeneracies (e.g. a candidate class with too few probe samples)
/// are absorbed where they occur and never surface as errors; what remains
/// here are configuration mistakes and typed-access failures, which fail
/// fast at construction or lookup.
#[derive(Debug, Error)]
pub enum LabelSeekError {
    /// Tried to read a key that is not in a record.
    #[error("Key {0} is not in the record")]
    RecordKeyError(String),

    /// The value of a record key does not have the expected type.
    #[error("Record value for the given key is not of type {0}")]
    RecordValueTypeError(String),

    /// Reward values violate `incorrect < request < correct`.
    #[error("Invalid reward ordering: incorrect ({incorrect}) < request ({request}) < correct ({correct}) must hold")]
    InvalidRewardOrder {
        /// Reward for requesting the true label.
        request: f32,
        /// Reward for a correct prediction.
        correct: f32,
        /// Reward for an incorrect prediction.
        incorrect: f32,
    },

    /// An episode batch was built from mismatched array shapes.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A source was asked for episodes but holds no classes or samples.
    #[error("The class pool is empty or smaller than an episode requires")]
    EmptyClassPool,
}
