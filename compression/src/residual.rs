use std::num::NonZeroU64;

use comms::EncodedUpdate;

use crate::{EncodingErr, Result};

/// Periodic clamping of the residual to `±clip × threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clipping {
    pub every: NonZeroU64,
    pub clip: f32,
}

/// Owns the gradient mass that was withheld from transmission.
///
/// After every `update` each residual element holds exactly the part of the adjusted
/// gradient that was not sent, so nothing is lost, only delayed. Clipping is the one
/// operation that discards mass and it is accounted for in `clipped_mass`.
#[derive(Debug, Clone)]
pub struct ResidualPostProcessor {
    residual: Vec<f32>,
    discharge: f32,
    clipping: Option<Clipping>,
    clipped_mass: f64,
}

impl ResidualPostProcessor {
    /// Creates a new `ResidualPostProcessor` with an all zero residual.
    ///
    /// # Arguments
    /// * `len` - The length of the gradients.
    /// * `discharge` - The fraction of a selected element that is transmitted, in `(0, 1]`.
    ///
    /// # Returns
    /// A new instance or `InvalidConfig`.
    pub fn new(len: usize, discharge: f32) -> Result<Self> {
        if !(discharge > 0. && discharge <= 1.) {
            return Err(EncodingErr::InvalidConfig(format!(
                "discharge must be in (0, 1], got {discharge}"
            )));
        }

        Ok(Self {
            residual: vec![0.; len],
            discharge,
            clipping: None,
            clipped_mass: 0.,
        })
    }

    /// Enables periodic clipping.
    ///
    /// # Arguments
    /// * `clipping` - How often and how tight to clip, `clip` must be positive.
    pub fn with_clipping(mut self, clipping: Clipping) -> Result<Self> {
        if !clipping.clip.is_finite() || clipping.clip <= 0. {
            return Err(EncodingErr::InvalidConfig(format!(
                "clip must be finite and positive, got {}",
                clipping.clip
            )));
        }

        self.clipping = Some(clipping);
        Ok(self)
    }

    pub fn residual(&self) -> &[f32] {
        &self.residual
    }

    pub fn discharge(&self) -> f32 {
        self.discharge
    }

    /// The total mass removed by clipping since creation or the last reset.
    pub fn clipped_mass(&self) -> f64 {
        self.clipped_mass
    }

    pub fn l2_norm(&self) -> f32 {
        self.residual.iter().map(|r| r * r).sum::<f32>().sqrt()
    }

    fn check_len(&self, got: usize) -> Result<()> {
        if got != self.residual.len() {
            return Err(EncodingErr::LengthMismatch {
                expected: self.residual.len(),
                got,
            });
        }

        Ok(())
    }

    /// Adds the residual into `grad` element wise.
    pub fn apply(&self, grad: &mut [f32]) -> Result<()> {
        self.check_len(grad.len())?;

        grad.iter_mut()
            .zip(&self.residual)
            .for_each(|(g, r)| *g += r);

        Ok(())
    }

    /// Writes back everything in `adjusted` that `sent` didn't carry.
    ///
    /// # Arguments
    /// * `adjusted` - The gradient with the previous residual applied.
    /// * `sent` - The update that was encoded from `adjusted`.
    pub fn update(&mut self, adjusted: &[f32], sent: &EncodedUpdate) -> Result<()> {
        self.check_len(adjusted.len())?;
        self.check_len(sent.tensor_len())?;

        self.residual.copy_from_slice(adjusted);

        for entry in sent.entries() {
            let index = entry.index as usize;
            let Some(r) = self.residual.get_mut(index) else {
                return Err(EncodingErr::IndexOutOfRange {
                    index,
                    len: adjusted.len(),
                });
            };

            *r -= entry.value();
        }

        Ok(())
    }

    /// Runs the periodic maintenance of the residual.
    ///
    /// # Arguments
    /// * `iteration` - The iteration that was just dispatched.
    /// * `threshold` - The threshold used in that iteration.
    pub fn post_process(&mut self, iteration: u64, threshold: f32) {
        let Some(Clipping { every, clip }) = self.clipping else {
            return;
        };

        if iteration == 0 || iteration % every.get() != 0 {
            return;
        }

        let bound = clip * threshold;
        let mut removed = 0f64;

        for r in &mut self.residual {
            let clamped = r.clamp(-bound, bound);
            removed += (*r - clamped) as f64;
            *r = clamped;
        }

        self.clipped_mass += removed;
    }

    /// Zeroes the residual, used when training restarts.
    pub fn reset(&mut self) {
        self.residual.fill(0.);
        self.clipped_mass = 0.;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(len: u32, entries: &[(u32, f32)]) -> EncodedUpdate {
        let indices = entries.iter().map(|e| e.0).collect();
        let signs = entries.iter().map(|e| if e.1 < 0. { -1 } else { 1 }).collect();
        let magnitudes = entries.iter().map(|e| e.1.abs()).collect();
        EncodedUpdate::new(0, 0, len, len, indices, signs, magnitudes).unwrap()
    }

    #[test]
    fn apply_adds_residual() {
        let mut proc = ResidualPostProcessor::new(3, 1.).unwrap();
        proc.update(&[1., 2., 3.], &update(3, &[(1, 2.)])).unwrap();

        let mut grad = [1., 1., 1.];
        proc.apply(&mut grad).unwrap();
        assert_eq!(grad, [2., 1., 4.]);
    }

    #[test]
    fn update_conserves_mass() {
        let mut proc = ResidualPostProcessor::new(4, 1.).unwrap();
        let adjusted = [0.5, -3., 0.25, 2.];
        let sent = update(4, &[(1, -2.5), (3, 2.)]);

        proc.update(&adjusted, &sent).unwrap();
        assert_eq!(proc.residual(), [0.5, -0.5, 0.25, 0.]);

        let total = sent.mass() + proc.residual().iter().map(|&r| r as f64).sum::<f64>();
        assert_eq!(total, adjusted.iter().map(|&a| a as f64).sum::<f64>());
    }

    #[test]
    fn length_mismatch() {
        let proc = ResidualPostProcessor::new(3, 1.).unwrap();
        let err = proc.apply(&mut [1.; 2]).unwrap_err();
        assert!(matches!(
            err,
            EncodingErr::LengthMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn clipping_is_periodic_and_accounted() {
        let clipping = Clipping {
            every: NonZeroU64::new(2).unwrap(),
            clip: 2.,
        };
        let mut proc = ResidualPostProcessor::new(2, 1.)
            .unwrap()
            .with_clipping(clipping)
            .unwrap();

        proc.update(&[5., -5.], &update(2, &[])).unwrap();

        proc.post_process(1, 1.);
        assert_eq!(proc.residual(), [5., -5.]);

        proc.update(&[5., -1.], &update(2, &[])).unwrap();
        proc.post_process(2, 1.);
        assert_eq!(proc.residual(), [2., -1.]);
        assert_eq!(proc.clipped_mass(), 3.);
    }

    #[test]
    fn invalid_discharge() {
        assert!(ResidualPostProcessor::new(1, 0.).is_err());
        assert!(ResidualPostProcessor::new(1, 1.5).is_err());
    }
}
