//! Small numeric helpers shared across the crate.
use ndarray::{ArrayView1, ArrayView2};

/// Index of the maximum element of a row vector.
///
/// Ties resolve to the lowest index, which keeps greedy action selection
/// deterministic for a frozen policy.
pub fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_v = f32::NEG_INFINITY;
    for (i, v) in row.iter().enumerate() {
        if *v > best_v {
            best_v = *v;
            best = i;
        }
    }
    best
}

/// Row-wise argmax of a `[batch, n]` matrix.
pub(crate) fn argmax_rows(m: ArrayView2<f32>) -> Vec<usize> {
    m.rows().into_iter().map(argmax).collect()
}

#[cfg(test)]
mod tests {
    use super::argmax;
    use ndarray::arr1;

    #[test]
    fn argmax_breaks_ties_toward_lowest_index() {
        let a = arr1(&[0.5f32, 1.0, 1.0, -2.0]);
        assert_eq!(argmax(a.view()), 1);
    }
}
