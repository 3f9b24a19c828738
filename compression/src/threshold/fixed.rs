use super::{ThresholdAlgorithm, ThresholdState};
use crate::{EncodingErr, Result};

/// Always uses the same threshold.
#[derive(Debug, Clone)]
pub struct FixedThreshold {
    threshold: f32,
}

impl FixedThreshold {
    /// Creates a new `FixedThreshold`.
    ///
    /// # Arguments
    /// * `threshold` - The cutoff, must be finite and non negative.
    pub fn new(threshold: f32) -> Result<Self> {
        if !threshold.is_finite() || threshold < 0. {
            return Err(EncodingErr::InvalidConfig(format!(
                "fixed threshold must be finite and non negative, got {threshold}"
            )));
        }

        Ok(Self { threshold })
    }
}

impl ThresholdAlgorithm for FixedThreshold {
    fn next_threshold(&mut self, _grad: &[f32], _state: &ThresholdState) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_and_recorded() {
        let mut algo = FixedThreshold::new(0.5).unwrap();
        let mut state = ThresholdState::new(2);

        assert_eq!(algo.compute_threshold(&[1., 2.], &mut state).unwrap(), 0.5);
        assert_eq!(algo.compute_threshold(&[9., 9.], &mut state).unwrap(), 0.5);
        assert_eq!(state.iterations(), 2);
    }

    #[test]
    fn rejects_negative() {
        assert!(FixedThreshold::new(-1.).is_err());
        assert!(FixedThreshold::new(f32::INFINITY).is_err());
    }

    #[test]
    fn length_mismatch_is_invalid_state() {
        let mut algo = FixedThreshold::new(0.5).unwrap();
        let mut state = ThresholdState::new(3);

        let err = algo.compute_threshold(&[1.], &mut state).unwrap_err();
        assert!(matches!(err, EncodingErr::InvalidState { .. }));
        assert_eq!(state.iterations(), 0);
    }
}
