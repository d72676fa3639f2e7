//! K-shot statistics and aggregate episode metrics.
//!
//! The statistics dictionaries of the original experiment design are kept as
//! an explicit accumulator owned by the caller: the trainer and validator
//! take a [`KShotStats`] by mutable reference and return it updated. There
//! is no module-level state.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical k-shot buckets: the k-th occurrence of a class in an episode.
pub const DEFAULT_BUCKETS: [usize; 4] = [1, 2, 5, 10];

/// What a single decision turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The agent requested the true label.
    Requested,
    /// The agent predicted the correct class.
    Correct,
    /// The agent predicted a wrong class.
    Incorrect,
}

/// Accuracy and request rates binned by instance occurrence count.
///
/// For every bucket `k`, each recorded entry says whether the k-th exposure
/// to some class within an episode was answered correctly (`accuracy`) or
/// with a label request (`requests`). Entries are grouped per episode so
/// windows of recent episodes can be reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KShotStats {
    accuracy: BTreeMap<usize, Vec<Vec<u8>>>,
    requests: BTreeMap<usize, Vec<Vec<u8>>>,
}

impl Default for KShotStats {
    fn default() -> Self {
        Self::new(&DEFAULT_BUCKETS)
    }
}

impl KShotStats {
    /// Constructs an accumulator with the given occurrence buckets.
    pub fn new(buckets: &[usize]) -> Self {
        let accuracy = buckets.iter().map(|k| (*k, Vec::new())).collect();
        let requests = buckets.iter().map(|k| (*k, Vec::new())).collect();
        Self { accuracy, requests }
    }

    /// The buckets this accumulator tracks, ascending.
    pub fn buckets(&self) -> Vec<usize> {
        self.accuracy.keys().copied().collect()
    }

    /// Opens a new per-episode group in every bucket.
    pub fn begin_episode(&mut self) {
        for v in self.accuracy.values_mut() {
            v.push(Vec::new());
        }
        for v in self.requests.values_mut() {
            v.push(Vec::new());
        }
    }

    /// Records the outcome of the `k`-th exposure to a class.
    ///
    /// Outcomes for `k` outside the tracked buckets are dropped. A request
    /// counts as 1 in the request series and 0 in the accuracy series; only
    /// a correct prediction counts as 1 in the accuracy series.
    pub fn record(&mut self, k: usize, outcome: Outcome) {
        if let Some(v) = self.accuracy.get_mut(&k) {
            if let Some(episode) = v.last_mut() {
                episode.push(if outcome == Outcome::Correct { 1 } else { 0 });
            }
        }
        if let Some(v) = self.requests.get_mut(&k) {
            if let Some(episode) = v.last_mut() {
                episode.push(if outcome == Outcome::Requested { 1 } else { 0 });
            }
        }
    }

    /// Number of per-episode groups recorded so far.
    pub fn episodes(&self) -> usize {
        self.accuracy.values().next().map(|v| v.len()).unwrap_or(0)
    }

    /// Fraction of correct predictions at bucket `k` over the last
    /// `window` episodes, 0 when the bucket has no observations.
    pub fn accuracy_rate(&self, k: usize, window: usize) -> f32 {
        Self::rate(self.accuracy.get(&k), window)
    }

    /// Fraction of requests at bucket `k` over the last `window` episodes,
    /// 0 when the bucket has no observations.
    pub fn request_rate(&self, k: usize, window: usize) -> f32 {
        Self::rate(self.requests.get(&k), window)
    }

    fn rate(series: Option<&Vec<Vec<u8>>>, window: usize) -> f32 {
        let series = match series {
            Some(s) => s,
            None => return 0.0,
        };
        let start = series.len().saturating_sub(window);
        let mut hits = 0usize;
        let mut total = 0usize;
        for episode in &series[start..] {
            hits += episode.iter().map(|v| *v as usize).sum::<usize>();
            total += episode.len();
        }
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }

    /// Raw per-episode entries of the accuracy series at bucket `k`.
    pub fn accuracy_entries(&self, k: usize) -> Option<&Vec<Vec<u8>>> {
        self.accuracy.get(&k)
    }

    /// Raw per-episode entries of the request series at bucket `k`.
    pub fn request_entries(&self, k: usize) -> Option<&Vec<Vec<u8>>> {
        self.requests.get(&k)
    }
}

/// Aggregate counters over one episode batch.
///
/// `predict` counts every decision (requests included), so the testable
/// invariant `predict == episode_size * batch_size` holds after a full
/// episode: each timestep yields exactly one action per batch element.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpisodeSummary {
    /// Correct predictions.
    pub correct: f32,
    /// Decisions taken (predictions plus requests).
    pub predict: f32,
    /// Label requests.
    pub requests: f32,
    /// Sum over timesteps of the batch-mean reward.
    pub reward: f32,
    /// Accumulated optimization loss (0 in validation).
    pub loss: f32,
}

impl EpisodeSummary {
    /// Counts one decision.
    pub fn observe(&mut self, outcome: Outcome) {
        self.predict += 1.0;
        match outcome {
            Outcome::Requested => self.requests += 1.0,
            Outcome::Correct => self.correct += 1.0,
            Outcome::Incorrect => {}
        }
    }

    /// Accuracy among actual predictions, `100 * correct / (predict - requests)`,
    /// guarded against an all-request episode.
    pub fn prediction_accuracy(&self) -> f32 {
        100.0 * self.correct / (self.predict - self.requests).max(1.0)
    }

    /// Overall accuracy, `100 * correct / predict`.
    pub fn total_accuracy(&self) -> f32 {
        if self.predict > 0.0 {
            100.0 * self.correct / self.predict
        } else {
            0.0
        }
    }

    /// Percentage of decisions that were label requests.
    pub fn request_percentage(&self) -> f32 {
        if self.predict > 0.0 {
            100.0 * self.requests / self.predict
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_correct_lands_in_the_right_buckets() {
        let mut stats = KShotStats::default();
        stats.begin_episode();
        // First occurrence of class A: request. Second: correct prediction.
        stats.record(1, Outcome::Requested);
        stats.record(2, Outcome::Correct);

        assert_eq!(stats.accuracy_entries(1).unwrap()[0], vec![0]);
        assert_eq!(stats.accuracy_entries(2).unwrap()[0], vec![1]);
        assert_eq!(stats.request_entries(1).unwrap()[0], vec![1]);
        assert_eq!(stats.request_entries(2).unwrap()[0], vec![0]);
    }

    #[test]
    fn empty_buckets_report_zero_not_nan() {
        let stats = KShotStats::default();
        assert_eq!(stats.accuracy_rate(5, 10), 0.0);
        assert_eq!(stats.request_rate(10, 10), 0.0);
        // Unknown bucket behaves the same.
        assert_eq!(stats.accuracy_rate(3, 10), 0.0);
    }

    #[test]
    fn rates_respect_the_episode_window() {
        let mut stats = KShotStats::new(&[1]);
        stats.begin_episode();
        stats.record(1, Outcome::Incorrect);
        stats.begin_episode();
        stats.record(1, Outcome::Correct);

        assert_eq!(stats.accuracy_rate(1, 1), 1.0);
        assert_eq!(stats.accuracy_rate(1, 2), 0.5);
    }

    #[test]
    fn summary_formulas_match_the_aggregates() {
        let mut s = EpisodeSummary::default();
        for _ in 0..2 {
            s.observe(Outcome::Correct);
        }
        s.observe(Outcome::Requested);
        s.observe(Outcome::Incorrect);

        assert_eq!(s.predict, 4.0);
        assert_eq!(s.total_accuracy(), 50.0);
        assert!((s.prediction_accuracy() - 100.0 * 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(s.request_percentage(), 25.0);
    }

    #[test]
    fn all_request_episode_does_not_divide_by_zero() {
        let mut s = EpisodeSummary::default();
        s.observe(Outcome::Requested);
        assert_eq!(s.prediction_accuracy(), 0.0);
    }
}
