use super::{ThresholdAlgorithm, ThresholdState};
use crate::{EncodingErr, Result};

/// Nudges the threshold after every iteration to keep the achieved sparsity in a band.
///
/// When fewer elements than `min_sparsity` were sent the threshold is multiplied by
/// `decay`, when more than `max_sparsity` were sent it is divided by it.
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    initial: f32,
    min_sparsity: f64,
    max_sparsity: f64,
    decay: f32,
}

impl AdaptiveThreshold {
    /// Creates a new `AdaptiveThreshold`.
    ///
    /// # Arguments
    /// * `initial` - The threshold used until a sparsity has been recorded.
    /// * `min_sparsity` - The lower end of the target band, in `[0, 1]`.
    /// * `max_sparsity` - The upper end of the target band, in `[min_sparsity, 1]`.
    /// * `decay` - The adjustment factor, in `(0, 1)`.
    ///
    /// # Returns
    /// A new `AdaptiveThreshold` or `InvalidConfig`.
    pub fn new(initial: f32, min_sparsity: f64, max_sparsity: f64, decay: f32) -> Result<Self> {
        if !initial.is_finite() || initial <= 0. {
            return Err(EncodingErr::InvalidConfig(format!(
                "initial threshold must be finite and positive, got {initial}"
            )));
        }

        if !(0. ..=1.).contains(&min_sparsity) || !(min_sparsity..=1.).contains(&max_sparsity) {
            return Err(EncodingErr::InvalidConfig(format!(
                "sparsity band [{min_sparsity}, {max_sparsity}] is not within [0, 1]"
            )));
        }

        if !(decay > 0. && decay < 1.) {
            return Err(EncodingErr::InvalidConfig(format!(
                "decay must be in (0, 1), got {decay}"
            )));
        }

        Ok(Self {
            initial,
            min_sparsity,
            max_sparsity,
            decay,
        })
    }
}

impl ThresholdAlgorithm for AdaptiveThreshold {
    fn next_threshold(&mut self, _grad: &[f32], state: &ThresholdState) -> f32 {
        let prev = state.last_threshold().unwrap_or(self.initial);

        let next = match state.last_sparsity() {
            Some(s) if s < self.min_sparsity => prev * self.decay,
            Some(s) if s > self.max_sparsity => prev / self.decay,
            _ => prev,
        };

        next.clamp(f32::MIN_POSITIVE, f32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_band() {
        let mut algo = AdaptiveThreshold::new(1., 0.2, 0.5, 0.5).unwrap();
        let mut state = ThresholdState::new(10);
        let grad = [0.; 10];

        assert_eq!(algo.compute_threshold(&grad, &mut state).unwrap(), 1.);

        // Too sparse, lower the cutoff.
        state.record_sparsity(1);
        assert_eq!(algo.compute_threshold(&grad, &mut state).unwrap(), 0.5);

        // Inside the band, keep it.
        state.record_sparsity(3);
        assert_eq!(algo.compute_threshold(&grad, &mut state).unwrap(), 0.5);

        // Too dense, raise it.
        state.record_sparsity(8);
        assert_eq!(algo.compute_threshold(&grad, &mut state).unwrap(), 1.);
    }

    #[test]
    fn invalid_configs() {
        assert!(AdaptiveThreshold::new(0., 0.1, 0.2, 0.5).is_err());
        assert!(AdaptiveThreshold::new(1., 0.3, 0.2, 0.5).is_err());
        assert!(AdaptiveThreshold::new(1., 0.1, 0.2, 1.).is_err());
    }
}
