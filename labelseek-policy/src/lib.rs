#![warn(missing_docs)]
//! Recurrent Q-network policy for `labelseek` without a tensor backend.
//!
//! The network is a single-layer Elman recurrence over plain [`ndarray`]
//! matrices with hand-derived gradients, so the whole harness runs without
//! linking a deep-learning framework. It implements the
//! [`QNetwork`](labelseek_core::QNetwork) and
//! [`QAgent`](labelseek_core::QAgent) traits of `labelseek-core`:
//! one-step temporal-difference updates with the gradient cut at the
//! incoming hidden state, and full backpropagation through time for the
//! supervised sequence mode.
mod opt;
mod rnn;

pub use opt::{Adam, OptimizerConfig};
pub use rnn::{RnnHidden, RnnQNet, RnnQNetConfig, RnnQNetParams};
