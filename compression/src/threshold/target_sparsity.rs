use super::{ThresholdAlgorithm, ThresholdState};
use crate::{EncodingErr, Result};

/// Picks the threshold that would select a target fraction of the elements.
///
/// The raw cutoff is the magnitude of the `ceil(sparsity * n)`-th largest element, found
/// with a linear time selection, and it is smoothed against the previous threshold. When
/// fewer than that many elements are non-zero, the smallest non-zero magnitude is used so
/// the cutoff never collapses to zero while there is mass to send.
#[derive(Debug, Clone)]
pub struct TargetSparsityThreshold {
    sparsity: f64,
    smoothing: f32,
    scratch: Vec<f32>,
}

impl TargetSparsityThreshold {
    /// Creates a new `TargetSparsityThreshold`.
    ///
    /// # Arguments
    /// * `sparsity` - The fraction of elements to select, in `(0, 1]`.
    /// * `smoothing` - The weight of the newest cutoff, in `(0, 1]`. `1` disables smoothing.
    ///
    /// # Returns
    /// A new `TargetSparsityThreshold` or `InvalidConfig`.
    pub fn new(sparsity: f64, smoothing: f32) -> Result<Self> {
        if !(sparsity > 0. && sparsity <= 1.) {
            return Err(EncodingErr::InvalidConfig(format!(
                "target sparsity must be in (0, 1], got {sparsity}"
            )));
        }

        if !(smoothing > 0. && smoothing <= 1.) {
            return Err(EncodingErr::InvalidConfig(format!(
                "smoothing must be in (0, 1], got {smoothing}"
            )));
        }

        Ok(Self {
            sparsity,
            smoothing,
            scratch: Vec::new(),
        })
    }
}

impl ThresholdAlgorithm for TargetSparsityThreshold {
    fn next_threshold(&mut self, grad: &[f32], state: &ThresholdState) -> f32 {
        let n = grad.len();
        let k = ((self.sparsity * n as f64).ceil() as usize).clamp(1, n);

        self.scratch.clear();
        self.scratch.extend(grad.iter().map(|g| g.abs()));

        let (larger, kth, _) = self.scratch.select_nth_unstable_by(k - 1, |a, b| b.total_cmp(a));
        let raw = if *kth > 0. {
            *kth
        } else {
            larger
                .iter()
                .copied()
                .filter(|&m| m > 0.)
                .min_by(f32::total_cmp)
                .unwrap_or(0.)
        };

        match state.last_threshold() {
            Some(prev) => self.smoothing * raw + (1. - self.smoothing) * prev,
            None => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_kth_magnitude() {
        let mut algo = TargetSparsityThreshold::new(0.5, 1.).unwrap();
        let mut state = ThresholdState::new(4);

        let threshold = algo
            .compute_threshold(&[0.1, -0.5, 0.3, 0.9], &mut state)
            .unwrap();

        assert_eq!(threshold, 0.5);
    }

    #[test]
    fn at_least_one_element() {
        let mut algo = TargetSparsityThreshold::new(0.01, 1.).unwrap();
        let mut state = ThresholdState::new(3);

        let threshold = algo.compute_threshold(&[1., -3., 2.], &mut state).unwrap();
        assert_eq!(threshold, 3.);
    }

    #[test]
    fn smoothing_and_determinism() {
        let grad = [4., 0., 0., 0.];
        let run = || {
            let mut algo = TargetSparsityThreshold::new(0.25, 0.5).unwrap();
            let mut state = ThresholdState::new(4);
            let first = algo.compute_threshold(&grad, &mut state).unwrap();
            let second = algo.compute_threshold(&[2., 0., 0., 0.], &mut state).unwrap();
            (first, second)
        };

        assert_eq!(run(), (4., 3.));
        assert_eq!(run(), run());
    }

    #[test]
    fn sparse_gradient_keeps_non_zero_cutoff() {
        let mut algo = TargetSparsityThreshold::new(0.75, 1.).unwrap();
        let mut state = ThresholdState::new(4);

        let threshold = algo
            .compute_threshold(&[5., 0., -2., 0.], &mut state)
            .unwrap();
        assert_eq!(threshold, 2.);

        let threshold = algo.compute_threshold(&[0.; 4], &mut state).unwrap();
        assert_eq!(threshold, 0.);
    }
}
