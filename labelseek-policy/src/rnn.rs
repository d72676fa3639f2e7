//! Elman recurrent Q-network with hand-derived gradients.
mod config;

use crate::opt::Adam;
use anyhow::{ensure, Result};
pub use config::RnnQNetConfig;
use labelseek_core::{HiddenState, QAgent, QNetwork, Transition};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

const WXH: usize = 0;
const WHH: usize = 1;
const BH: usize = 2;
const WHY: usize = 3;
const BY: usize = 4;

/// Hidden state of [`RnnQNet`], `[batch, hidden]`.
///
/// This backend keeps no gradient tape; updates recompute the one step (or
/// the whole sequence) they differentiate, so detaching is a no-op on the
/// numeric content.
#[derive(Debug, Clone)]
pub struct RnnHidden {
    h: Array2<f32>,
}

impl RnnHidden {
    /// The raw hidden activations.
    pub fn values(&self) -> &Array2<f32> {
        &self.h
    }
}

impl HiddenState for RnnHidden {
    fn detach(self) -> Self {
        self
    }
}

/// Serializable snapshot of the network parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RnnQNetParams {
    /// Input-to-hidden weights, `[input, hidden]`.
    pub wxh: Array2<f32>,
    /// Hidden-to-hidden weights, `[hidden, hidden]`.
    pub whh: Array2<f32>,
    /// Hidden bias.
    pub bh: Array1<f32>,
    /// Hidden-to-output weights, `[hidden, classes + 1]`.
    pub why: Array2<f32>,
    /// Output bias.
    pub by: Array1<f32>,
}

/// Single-layer Elman RNN mapping states to action values.
///
/// The output layer has `classes + 1` units; the last one is the value of
/// requesting the true label. Gradients are clamped elementwise to
/// `[-1, 1]` before the Adam update.
pub struct RnnQNet {
    classes: usize,
    input_dim: usize,
    hidden_dim: usize,
    wxh: Array2<f32>,
    whh: Array2<f32>,
    bh: Array1<f32>,
    why: Array2<f32>,
    by: Array1<f32>,
    opt: Adam,
    training: bool,
}

impl RnnQNet {
    pub(crate) fn from_parts(
        classes: usize,
        input_dim: usize,
        hidden_dim: usize,
        params: RnnQNetParams,
        opt: Adam,
    ) -> Self {
        Self {
            classes,
            input_dim,
            hidden_dim,
            wxh: params.wxh,
            whh: params.whh,
            bh: params.bh,
            why: params.why,
            by: params.by,
            opt,
            training: false,
        }
    }

    /// Hidden layer width.
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn step(&self, x: &Array2<f32>, h: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let h_new = (x.dot(&self.wxh) + h.dot(&self.whh) + &self.bh).mapv(f32::tanh);
        let q = h_new.dot(&self.why) + &self.by;
        (q, h_new)
    }

    fn apply_grads(&mut self, mut grads: Grads) {
        for g in [
            &mut grads.wxh,
            &mut grads.whh,
            &mut grads.why,
        ] {
            g.mapv_inplace(|v| v.clamp(-1.0, 1.0));
        }
        grads.bh.mapv_inplace(|v| v.clamp(-1.0, 1.0));
        grads.by.mapv_inplace(|v| v.clamp(-1.0, 1.0));

        self.opt.begin_step();
        self.opt.update(WXH, &mut self.wxh, &grads.wxh);
        self.opt.update(WHH, &mut self.whh, &grads.whh);
        self.opt.update(BH, &mut self.bh, &grads.bh);
        self.opt.update(WHY, &mut self.why, &grads.why);
        self.opt.update(BY, &mut self.by, &grads.by);
    }

    /// Softmax over the class logits only; the request unit takes no part
    /// in the supervised loss.
    fn class_probs(&self, q: &Array2<f32>) -> Array2<f32> {
        let batch = q.nrows();
        let mut p = Array2::zeros((batch, self.classes));
        for b in 0..batch {
            let row = q.row(b);
            let max = row
                .iter()
                .take(self.classes)
                .fold(f32::NEG_INFINITY, |a, v| a.max(*v));
            let mut sum = 0.0;
            for j in 0..self.classes {
                let e = (row[j] - max).exp();
                p[[b, j]] = e;
                sum += e;
            }
            for j in 0..self.classes {
                p[[b, j]] /= sum;
            }
        }
        p
    }
}

struct Grads {
    wxh: Array2<f32>,
    whh: Array2<f32>,
    bh: Array1<f32>,
    why: Array2<f32>,
    by: Array1<f32>,
}

impl Grads {
    fn zeros(net: &RnnQNet) -> Self {
        Self {
            wxh: Array2::zeros(net.wxh.raw_dim()),
            whh: Array2::zeros(net.whh.raw_dim()),
            bh: Array1::zeros(net.bh.raw_dim()),
            why: Array2::zeros(net.why.raw_dim()),
            by: Array1::zeros(net.by.raw_dim()),
        }
    }
}

impl QNetwork for RnnQNet {
    type Hidden = RnnHidden;

    fn reset_hidden(&self, batch_size: usize) -> RnnHidden {
        RnnHidden {
            h: Array2::zeros((batch_size, self.hidden_dim)),
        }
    }

    fn forward(&self, input: &Array2<f32>, hidden: &RnnHidden) -> (Array2<f32>, RnnHidden) {
        let (q, h_new) = self.step(input, &hidden.h);
        (q, RnnHidden { h: h_new })
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn num_actions(&self) -> usize {
        self.classes + 1
    }
}

impl QAgent for RnnQNet {
    type Params = RnnQNetParams;

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn is_train(&self) -> bool {
        self.training
    }

    /// One-step temporal-difference update.
    ///
    /// Recomputes `Q(s, a)` from the transition and the incoming hidden
    /// state, forms the detached target `r + gamma * max_a Q(s', a)` (just
    /// `r` at the terminal step) and backpropagates through this single
    /// step; no gradient reaches the incoming hidden state.
    fn td_step(&mut self, transition: &Transition, hidden: &RnnHidden, gamma: f32) -> Result<f32> {
        let batch = transition.batch_size();
        let x = &transition.state;
        let (q, h_new) = self.step(x, &hidden.h);

        let targets: Vec<f32> = match &transition.next_state {
            Some(next) => {
                let (q_next, _) = self.step(next, &h_new);
                (0..batch)
                    .map(|b| {
                        let max = q_next
                            .row(b)
                            .iter()
                            .fold(f32::NEG_INFINITY, |a, v| a.max(*v));
                        transition.rewards[b] + gamma * max
                    })
                    .collect()
            }
            None => transition.rewards.clone(),
        };

        let mut dq = Array2::zeros(q.raw_dim());
        let mut loss = 0.0;
        for b in 0..batch {
            let a = transition.actions[b];
            let err = q[[b, a]] - targets[b];
            loss += err * err;
            dq[[b, a]] = 2.0 * err / batch as f32;
        }
        loss /= batch as f32;

        let mut grads = Grads::zeros(self);
        grads.why = h_new.t().dot(&dq);
        grads.by = dq.sum_axis(Axis(0));
        let dh = dq.dot(&self.why.t());
        let dpre = dh * h_new.mapv(|v| 1.0 - v * v);
        grads.wxh = x.t().dot(&dpre);
        grads.whh = hidden.h.t().dot(&dpre);
        grads.bh = dpre.sum_axis(Axis(0));

        self.apply_grads(grads);
        Ok(loss)
    }

    /// One supervised update over a teacher-forced episode.
    ///
    /// Cross-entropy over the class logits at every timestep, summed over
    /// the sequence, with full backpropagation through time.
    fn seq_step(&mut self, states: &[Array2<f32>], labels: &[Vec<usize>]) -> Result<f32> {
        ensure!(
            states.len() == labels.len(),
            "{} state steps vs {} label steps",
            states.len(),
            labels.len()
        );
        if states.is_empty() {
            return Ok(0.0);
        }
        let batch = states[0].nrows();

        // Forward, keeping what the backward pass needs.
        let mut h_in: Vec<Array2<f32>> = Vec::with_capacity(states.len());
        let mut h_out: Vec<Array2<f32>> = Vec::with_capacity(states.len());
        let mut dqs = Vec::with_capacity(states.len());
        let mut h_prev = Array2::zeros((batch, self.hidden_dim));
        let mut loss = 0.0;
        for (x, step_labels) in states.iter().zip(labels.iter()) {
            let (q, h_new) = self.step(x, &h_prev);
            let p = self.class_probs(&q);
            let mut dq = Array2::zeros(q.raw_dim());
            for b in 0..batch {
                let y = step_labels[b];
                loss += -(p[[b, y]].max(1e-12)).ln() / batch as f32;
                for j in 0..self.classes {
                    let target = if j == y { 1.0 } else { 0.0 };
                    dq[[b, j]] = (p[[b, j]] - target) / batch as f32;
                }
            }
            dqs.push(dq);
            h_in.push(h_prev);
            h_prev = h_new.clone();
            h_out.push(h_new);
        }

        // Backward through time.
        let mut grads = Grads::zeros(self);
        let mut dh_next: Array2<f32> = Array2::zeros((batch, self.hidden_dim));
        for t in (0..states.len()).rev() {
            let h_t = &h_out[t];
            let dq = &dqs[t];
            grads.why = grads.why + h_t.t().dot(dq);
            grads.by = grads.by + dq.sum_axis(Axis(0));
            let dh = dq.dot(&self.why.t()) + dh_next;
            let dpre = dh * h_t.mapv(|v| 1.0 - v * v);
            grads.wxh = grads.wxh + states[t].t().dot(&dpre);
            grads.whh = grads.whh + h_in[t].t().dot(&dpre);
            grads.bh = grads.bh + dpre.sum_axis(Axis(0));
            dh_next = dpre.dot(&self.whh.t());
        }

        self.apply_grads(grads);
        Ok(loss)
    }

    fn params(&self) -> RnnQNetParams {
        RnnQNetParams {
            wxh: self.wxh.clone(),
            whh: self.whh.clone(),
            bh: self.bh.clone(),
            why: self.why.clone(),
            by: self.by.clone(),
        }
    }

    fn set_params(&mut self, params: RnnQNetParams) -> Result<()> {
        ensure!(
            params.wxh.raw_dim() == self.wxh.raw_dim()
                && params.whh.raw_dim() == self.whh.raw_dim()
                && params.bh.raw_dim() == self.bh.raw_dim()
                && params.why.raw_dim() == self.why.raw_dim()
                && params.by.raw_dim() == self.by.raw_dim(),
            "parameter shapes do not match the network"
        );
        self.wxh = params.wxh;
        self.whh = params.whh;
        self.bh = params.bh;
        self.why = params.why;
        self.by = params.by;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use tempdir::TempDir;

    fn net(classes: usize, input_dim: usize) -> RnnQNet {
        let mut rng = SmallRng::seed_from_u64(31);
        RnnQNetConfig::new(input_dim, 16, classes).build(&mut rng)
    }

    #[test]
    fn forward_shapes_match_the_contract() {
        let net = net(3, 7);
        let h = net.reset_hidden(2);
        let x = Array2::from_elem((2, 7), 0.5);
        let (q, h_new) = net.forward(&x, &h);
        assert_eq!(q.shape(), &[2, 4]);
        assert_eq!(h_new.values().shape(), &[2, 16]);
    }

    #[test]
    fn td_updates_reduce_the_bellman_error() {
        let mut net = net(2, 5);
        let h = net.reset_hidden(1);
        let transition = Transition::new(
            arr2(&[[1.0f32, 0.0, 1.0, 0.0, 1.0]]),
            vec![1],
            None,
            vec![1.0],
        );

        let first = net.td_step(&transition, &h, 0.5).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = net.td_step(&transition, &h, 0.5).unwrap();
        }
        assert!(last < first);
    }

    #[test]
    fn sequence_updates_reduce_the_classification_loss() {
        let mut net = net(2, 5);
        let states = vec![
            arr2(&[[0.0f32, 0.0, 1.0, 0.0, 1.0]]),
            arr2(&[[1.0f32, 0.0, 0.0, 1.0, 0.0]]),
        ];
        let labels = vec![vec![0usize], vec![0]];

        let first = net.seq_step(&states, &labels).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = net.seq_step(&states, &labels).unwrap();
        }
        assert!(last < first);
    }

    #[test]
    fn detach_keeps_the_hidden_values() {
        let net = net(2, 5);
        let h = net.reset_hidden(1);
        let x = Array2::from_elem((1, 5), 1.0);
        let (_, h_new) = net.forward(&x, &h);
        let values = h_new.values().clone();
        assert_eq!(h_new.detach().values(), &values);
    }

    #[test]
    fn params_round_trip_through_disk() {
        let dir = TempDir::new("rnn").unwrap();
        let path = dir.path().join("params");
        let net_a = net(3, 7);
        net_a.save_params(&path).unwrap();

        let mut net_b = net(3, 7);
        net_b.load_params(&path).unwrap();
        assert_eq!(net_a.params(), net_b.params());

        let x = Array2::from_elem((1, 7), 1.0);
        let (qa, _) = net_a.forward(&x, &net_a.reset_hidden(1));
        let (qb, _) = net_b.forward(&x, &net_b.reset_hidden(1));
        assert_eq!(qa, qb);
    }
}
