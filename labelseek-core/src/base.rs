//! Core traits: the policy-network contract and the transition type.
mod policy;
mod transition;

pub use policy::{HiddenState, QAgent, QNetwork};
pub use transition::Transition;
