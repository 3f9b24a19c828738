use std::fmt::Debug;

use super::ThresholdState;
use crate::Result;

/// Computes the magnitude cutoff above which gradient elements are transmitted.
///
/// Implementations must be deterministic, the same gradient and state always yield
/// the same threshold.
pub trait ThresholdAlgorithm: Send + Debug {
    /// Computes the threshold for `grad` and folds it into `state`.
    ///
    /// # Arguments
    /// * `grad` - The gradient after the residual was applied.
    /// * `state` - The running statistics of this worker.
    ///
    /// # Returns
    /// A non negative threshold, or `EmptyGradient`/`InvalidState` if `grad` doesn't
    /// match `state`.
    fn compute_threshold(&mut self, grad: &[f32], state: &mut ThresholdState) -> Result<f32> {
        state.check(grad)?;

        let threshold = self.next_threshold(grad, state).max(0.);
        state.observe(threshold);
        Ok(threshold)
    }

    /// Should produce the next threshold, `grad` has already been validated against `state`.
    fn next_threshold(&mut self, grad: &[f32], state: &ThresholdState) -> f32;
}
