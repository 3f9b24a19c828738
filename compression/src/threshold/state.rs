use crate::{EncodingErr, Result};

/// The weight of the newest threshold in the moving average.
const EMA_WEIGHT: f64 = 0.1;

/// Running statistics of the thresholds chosen for one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdState {
    len: usize,
    last_threshold: Option<f32>,
    ema: Option<f64>,
    last_sparsity: Option<f64>,
    iterations: u64,
}

impl ThresholdState {
    /// Creates a new `ThresholdState` for gradients of `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            last_threshold: None,
            ema: None,
            last_sparsity: None,
            iterations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn last_threshold(&self) -> Option<f32> {
        self.last_threshold
    }

    /// The exponential moving average of every threshold observed so far.
    pub fn ema(&self) -> Option<f64> {
        self.ema
    }

    /// The fraction of elements sent in the last recorded iteration.
    pub fn last_sparsity(&self) -> Option<f64> {
        self.last_sparsity
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Checks that `grad` can be thresholded against this state.
    ///
    /// # Returns
    /// `EmptyGradient` or `InvalidState` if the gradient doesn't fit.
    pub fn check(&self, grad: &[f32]) -> Result<()> {
        if grad.is_empty() {
            return Err(EncodingErr::EmptyGradient);
        }

        if grad.len() != self.len {
            return Err(EncodingErr::InvalidState {
                expected: self.len,
                got: grad.len(),
            });
        }

        Ok(())
    }

    /// Folds a freshly computed threshold into the statistics.
    pub(crate) fn observe(&mut self, threshold: f32) {
        let t = threshold as f64;

        self.ema = Some(match self.ema {
            Some(ema) => EMA_WEIGHT * t + (1. - EMA_WEIGHT) * ema,
            None => t,
        });
        self.last_threshold = Some(threshold);
        self.iterations += 1;
    }

    /// Records how many elements made it into the last encoded update.
    ///
    /// # Arguments
    /// * `selected` - The amount of transmitted elements.
    pub fn record_sparsity(&mut self, selected: usize) {
        self.last_sparsity = Some(selected as f64 / self.len.max(1) as f64);
    }

    /// Forgets every statistic, keeping the length.
    pub fn reset(&mut self) {
        *self = Self::new(self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rejects_empty_and_mismatched() {
        let state = ThresholdState::new(3);

        assert!(matches!(state.check(&[]), Err(EncodingErr::EmptyGradient)));
        assert!(matches!(
            state.check(&[1., 2.]),
            Err(EncodingErr::InvalidState {
                expected: 3,
                got: 2
            })
        ));
        assert!(state.check(&[1., 2., 3.]).is_ok());
    }

    #[test]
    fn moving_average() {
        let mut state = ThresholdState::new(1);
        state.observe(1.);
        state.observe(2.);

        assert_eq!(state.last_threshold(), Some(2.));
        assert!((state.ema().unwrap() - 1.1).abs() < 1e-9);
        assert_eq!(state.iterations(), 2);
    }

    #[test]
    fn sparsity_and_reset() {
        let mut state = ThresholdState::new(4);
        state.observe(0.5);
        state.record_sparsity(1);
        assert_eq!(state.last_sparsity(), Some(0.25));

        state.reset();
        assert_eq!(state, ThresholdState::new(4));
    }
}
