//! Policy-network contract.
//!
//! The recurrent Q-network is an external collaborator; the trainer,
//! validator and margin sampler depend only on these traits. A network maps
//! a state batch and its recurrent hidden state to one unnormalized action
//! value per action, where the action space is `[0, classes]` and the last
//! index means "request the true label".
use super::Transition;
use anyhow::Result;
use ndarray::Array2;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// An opaque recurrent hidden state.
///
/// A hidden state is owned by exactly one component (trainer, validator or
/// margin sampler) at a time and is re-initialized at every episode
/// boundary via [`QNetwork::reset_hidden`]. It is never shared across
/// episodes or batch elements.
pub trait HiddenState: Sized {
    /// Severs the handle from any accumulated gradient history, keeping its
    /// numeric content.
    ///
    /// The per-timestep training mode calls this after every optimization
    /// boundary so that gradients never flow across timesteps; without the
    /// cut, step history would accumulate over the whole episode.
    fn detach(self) -> Self;
}

/// A recurrent action-value network.
///
/// Implementations advance all batch elements in lockstep: the hidden state
/// has batch dimension `batch_size` and one call to [`forward`] moves every
/// episode in the batch one timestep.
///
/// [`forward`]: QNetwork::forward
pub trait QNetwork {
    /// Recurrent state carried between timesteps.
    type Hidden: HiddenState;

    /// Produces a fresh hidden state for a new episode.
    fn reset_hidden(&self, batch_size: usize) -> Self::Hidden;

    /// One timestep of inference.
    ///
    /// `input` is `[batch, input_dim]`; the returned action values are
    /// `[batch, classes + 1]`.
    fn forward(&self, input: &Array2<f32>, hidden: &Self::Hidden) -> (Array2<f32>, Self::Hidden);

    /// Runs a whole episode through the network in one pass (sequence mode).
    ///
    /// The default implementation folds [`forward`] over the timesteps;
    /// backends with a native sequence path can override it.
    ///
    /// [`forward`]: QNetwork::forward
    fn forward_seq(
        &self,
        inputs: &[Array2<f32>],
        hidden: &Self::Hidden,
    ) -> (Vec<Array2<f32>>, Self::Hidden)
    where
        Self::Hidden: Clone,
    {
        let mut h = hidden.clone();
        let mut outputs = Vec::with_capacity(inputs.len());
        for x in inputs {
            let (q, h_next) = self.forward(x, &h);
            outputs.push(q);
            h = h_next;
        }
        (outputs, h)
    }

    /// Width of the state vector the network expects.
    fn input_dim(&self) -> usize;

    /// Number of actions, i.e. `classes + 1` including "request".
    fn num_actions(&self) -> usize;
}

/// A trainable policy.
///
/// Parameters are mutated only through [`td_step`] and [`seq_step`], each of
/// which is one optimization boundary; no other component writes to them.
///
/// [`td_step`]: QAgent::td_step
/// [`seq_step`]: QAgent::seq_step
pub trait QAgent: QNetwork {
    /// Serializable snapshot of the network parameters.
    type Params: Serialize + DeserializeOwned + Clone;

    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs one one-step temporal-difference update.
    ///
    /// Recomputes `Q(s, a)` from `transition.state` and `hidden`, forms the
    /// Bellman target `r + gamma * max_a Q(s', a)` (just `r` when
    /// `transition.next_state` is `None`), and applies a gradient step.
    /// Gradients must not flow beyond the given hidden state. Returns the
    /// mean squared Bellman error.
    fn td_step(
        &mut self,
        transition: &Transition,
        hidden: &Self::Hidden,
        gamma: f32,
    ) -> Result<f32>;

    /// Performs one end-of-episode sequence update.
    ///
    /// `states` holds one teacher-forced state batch per timestep and
    /// `labels` the ground-truth class per batch element per timestep. The
    /// loss is the sum over timesteps of the per-timestep classification
    /// loss; one gradient step is applied. Returns the loss.
    fn seq_step(&mut self, states: &[Array2<f32>], labels: &[Vec<usize>]) -> Result<f32>;

    /// Returns a snapshot of the parameters, e.g. for checkpointing.
    fn params(&self) -> Self::Params;

    /// Overwrites the parameters from a snapshot.
    fn set_params(&mut self, params: Self::Params) -> Result<()>;

    /// Save the parameters of the agent in the given file.
    fn save_params(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        bincode::serialize_into(std::io::BufWriter::new(file), &self.params())?;
        Ok(())
    }

    /// Load the parameters of the agent from the given file.
    fn load_params(&mut self, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let params = bincode::deserialize_from(std::io::BufReader::new(file))?;
        self.set_params(params)
    }
}
