//! Episode state builder.
//!
//! The per-timestep input to the Q-network is the concatenation of a
//! label-signal component and the flattened current sample. The signal is
//! all-zero on first exposure and carries the one-hot *previous* ground
//! truth only when the previous action was a request; it never encodes the
//! current timestep's label.
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::{rngs::SmallRng, Rng};

/// Thresholds a sample batch into boolean values, 1 if the value is
/// positive and 0 otherwise.
///
/// All sample inputs entering a state vector are boolean-valued; sources
/// apply this on ingest and the builder asserts it.
pub fn binarize(samples: &mut Array2<f32>) {
    samples.mapv_inplace(|v| if v > 0.0 { 1.0 } else { 0.0 });
}

/// Builds fixed-width state vectors out of label signals and raw samples.
#[derive(Debug, Clone)]
pub struct StateBuilder {
    classes: usize,
}

impl StateBuilder {
    /// Constructs a builder for episodes over the given number of classes.
    pub fn new(classes: usize) -> Self {
        Self { classes }
    }

    /// Number of classes per episode.
    pub fn classes(&self) -> usize {
        self.classes
    }

    /// The all-zero label signal every episode starts from.
    pub fn initial_signal(&self, batch_size: usize) -> Array2<f32> {
        Array2::zeros((batch_size, self.classes))
    }

    /// One-hot encodes a dense label per batch element.
    pub fn one_hot(&self, labels: &[usize]) -> Array2<f32> {
        let mut out = Array2::zeros((labels.len(), self.classes));
        for (b, label) in labels.iter().enumerate() {
            debug_assert!(*label < self.classes, "label out of range");
            out[[b, *label]] = 1.0;
        }
        out
    }

    /// Concatenates label signal and sample batch into the state batch.
    pub fn build(&self, signal: &Array2<f32>, samples: &Array2<f32>) -> Array2<f32> {
        debug_assert_eq!(signal.nrows(), samples.nrows());
        debug_assert!(
            samples.iter().all(|v| *v == 0.0 || *v == 1.0),
            "sample inputs must be binarized"
        );
        concatenate![Axis(1), signal.view(), samples.view()]
    }

    /// Label-signal sequence for supervised sequence training.
    ///
    /// Timestep 0 gets the zero signal; timestep `t > 0` gets the one-hot of
    /// the ground-truth label at `t - 1`, regardless of any action (teacher
    /// forcing).
    pub fn teacher_forced_signals(&self, labels: &[Vec<usize>]) -> Vec<Array2<f32>> {
        let mut signals = Vec::with_capacity(labels.len());
        if let Some(first) = labels.first() {
            signals.push(self.initial_signal(first.len()));
        }
        for prev in labels.iter().take(labels.len().saturating_sub(1)) {
            signals.push(self.one_hot(prev));
        }
        signals
    }

    /// Probe signal used by the margin sampler.
    ///
    /// `label` is drawn from `[0, classes]`; the value `classes` falls
    /// outside every real one-hot slot and yields the zero vector, so the
    /// network cannot special-case the probe.
    pub fn probe_signal(&self, batch_size: usize, label: usize) -> Array2<f32> {
        let mut out = Array2::zeros((batch_size, self.classes));
        if label < self.classes {
            out.column_mut(label).fill(1.0);
        }
        out
    }
}

/// Random multi-bit label codes, one per (batch element, class).
///
/// Used by the multi-label state mode: instead of a one-hot slot, each class
/// is identified by `bits` independent one-hot rows flattened into a
/// `bits * bits` vector. Codes are generated once per episode and stay fixed
/// for its duration.
#[derive(Debug, Clone)]
pub struct ClassCodes {
    codes: Vec<Vec<Array1<f32>>>,
    bits: usize,
}

impl ClassCodes {
    /// Draws fresh codes for an episode.
    pub fn generate(batch_size: usize, classes: usize, bits: usize, rng: &mut SmallRng) -> Self {
        let codes = (0..batch_size)
            .map(|_| {
                (0..classes)
                    .map(|_| {
                        let mut code = Array1::zeros(bits * bits);
                        for row in 0..bits {
                            let hot = rng.gen_range(0..bits);
                            code[row * bits + hot] = 1.0;
                        }
                        code
                    })
                    .collect()
            })
            .collect();
        Self { codes, bits }
    }

    /// Width of the flattened code vector.
    pub fn dim(&self) -> usize {
        self.bits * self.bits
    }

    /// The code of one batch element's label.
    pub fn code(&self, batch_index: usize, label: usize) -> &Array1<f32> {
        &self.codes[batch_index][label]
    }

    /// Label-signal batch carrying the code of each element's label.
    pub fn signal(&self, labels: &[usize]) -> Array2<f32> {
        debug_assert_eq!(labels.len(), self.codes.len());
        let mut out = Array2::zeros((labels.len(), self.dim()));
        for (b, label) in labels.iter().enumerate() {
            out.row_mut(b).assign(&self.codes[b][*label]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::SeedableRng;

    #[test]
    fn state_is_signal_then_sample() {
        let builder = StateBuilder::new(3);
        let signal = builder.one_hot(&[2]);
        let samples = arr2(&[[1.0f32, 0.0, 1.0, 1.0]]);
        let state = builder.build(&signal, &samples);
        assert_eq!(state.shape(), &[1, 7]);
        assert_eq!(state.row(0).to_vec(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn binarize_thresholds_at_zero() {
        let mut samples = arr2(&[[-0.5f32, 0.0, 0.25, 3.0]]);
        binarize(&mut samples);
        assert_eq!(samples.row(0).to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn teacher_forcing_never_leaks_current_label() {
        let builder = StateBuilder::new(2);
        let labels = vec![vec![1usize], vec![0], vec![1]];
        let signals = builder.teacher_forced_signals(&labels);
        assert_eq!(signals.len(), 3);
        // First exposure: zero signal, even though the true label is 1.
        assert_eq!(signals[0].row(0).to_vec(), vec![0.0, 0.0]);
        // Each later signal is the previous ground truth, not the current.
        assert_eq!(signals[1].row(0).to_vec(), vec![0.0, 1.0]);
        assert_eq!(signals[2].row(0).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn probe_signal_outside_classes_is_zero() {
        let builder = StateBuilder::new(3);
        assert_eq!(builder.probe_signal(2, 3).sum(), 0.0);
        assert_eq!(builder.probe_signal(2, 1).sum(), 2.0);
    }

    #[test]
    fn class_codes_are_one_hot_per_row() {
        let mut rng = SmallRng::seed_from_u64(7);
        let codes = ClassCodes::generate(2, 3, 5, &mut rng);
        assert_eq!(codes.dim(), 25);
        let signal = codes.signal(&[0, 2]);
        for b in 0..2 {
            for row in 0..5 {
                let s: f32 = signal.row(b).to_vec()[row * 5..(row + 1) * 5].iter().sum();
                assert_eq!(s, 1.0);
            }
        }
        // Codes are fixed for the episode: same label, same signal.
        assert_eq!(codes.signal(&[0, 2]), signal);
    }
}
