use std::num::NonZeroUsize;

use comms::{EncodedUpdate, specs::OverflowSpec};

use super::Quantization;
use crate::{EncodingErr, Result};

/// Which qualifying elements are kept when there are more than the boundary allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Keep the first `boundary` qualifying elements by index. A single cheap pass, but
    /// the kept elements are not necessarily the largest ones.
    #[default]
    IndexOrder,
    /// Keep the `boundary` largest qualifying elements, ties broken by index.
    MagnitudeRank,
}

impl From<OverflowSpec> for Overflow {
    fn from(value: OverflowSpec) -> Self {
        match value {
            OverflowSpec::IndexOrder => Overflow::IndexOrder,
            OverflowSpec::MagnitudeRank => Overflow::MagnitudeRank,
        }
    }
}

/// Converts dense gradients into bounded sparse updates.
#[derive(Debug, Clone)]
pub struct SparseEncoder {
    boundary: NonZeroUsize,
    quantization: Quantization,
    overflow: Overflow,
}

impl SparseEncoder {
    /// Creates a new `SparseEncoder`.
    ///
    /// # Arguments
    /// * `boundary` - The maximum amount of entries per update.
    /// * `quantization` - How magnitudes are represented.
    /// * `overflow` - Which elements survive when the boundary is exceeded.
    ///
    /// # Returns
    /// A new `SparseEncoder` or `InvalidConfig` if the boundary doesn't fit the wire format.
    pub fn new(
        boundary: NonZeroUsize,
        quantization: Quantization,
        overflow: Overflow,
    ) -> Result<Self> {
        if u32::try_from(boundary.get()).is_err() {
            return Err(EncodingErr::InvalidConfig(format!(
                "boundary {boundary} doesn't fit in 32 bits"
            )));
        }

        Ok(Self {
            boundary,
            quantization,
            overflow,
        })
    }

    pub fn boundary(&self) -> usize {
        self.boundary.get()
    }

    /// Encodes every element of `adjusted` whose magnitude reaches `threshold`.
    ///
    /// Elements whose quantized magnitude is zero carry nothing and are never selected.
    ///
    /// # Arguments
    /// * `adjusted` - The gradient with the residual applied.
    /// * `threshold` - The selection cutoff.
    /// * `discharge` - The fraction of every selected element to transmit.
    /// * `iteration` - The iteration tag of the update.
    /// * `epoch` - The epoch tag of the update.
    ///
    /// # Returns
    /// An update with at most `boundary` entries, in ascending index order.
    pub fn encode(
        &self,
        adjusted: &[f32],
        threshold: f32,
        discharge: f32,
        iteration: u64,
        epoch: u64,
    ) -> Result<EncodedUpdate> {
        let Ok(len) = u32::try_from(adjusted.len()) else {
            return Err(EncodingErr::InvalidConfig(format!(
                "gradient of {} elements doesn't fit in 32 bit indices",
                adjusted.len()
            )));
        };

        let boundary = self.boundary.get();
        let quantization = self.quantization;
        let qualifies = |v: f32| {
            let magnitude = quantization.quantize(v.abs() * discharge, threshold * discharge);
            v.abs() >= threshold && magnitude > 0.
        };

        let mut selected: Vec<u32> = Vec::new();

        match self.overflow {
            Overflow::IndexOrder => {
                for (i, &v) in adjusted.iter().enumerate() {
                    if selected.len() == boundary {
                        break;
                    }

                    if qualifies(v) {
                        selected.push(i as u32);
                    }
                }
            }
            Overflow::MagnitudeRank => {
                selected.extend(
                    adjusted
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| qualifies(**v))
                        .map(|(i, _)| i as u32),
                );

                if selected.len() > boundary {
                    selected.select_nth_unstable_by(boundary - 1, |&a, &b| {
                        let (va, vb) = (adjusted[a as usize].abs(), adjusted[b as usize].abs());
                        vb.total_cmp(&va).then(a.cmp(&b))
                    });
                    selected.truncate(boundary);
                    selected.sort_unstable();
                }
            }
        }

        let count = selected.len();
        let mut signs = Vec::with_capacity(count);
        let mut magnitudes = Vec::with_capacity(count);

        for &i in &selected {
            let v = adjusted[i as usize];
            signs.push(if v < 0. { -1 } else { 1 });
            magnitudes.push(quantization.quantize(v.abs() * discharge, threshold * discharge));
        }

        EncodedUpdate::new(
            iteration,
            epoch,
            boundary as u32,
            len,
            selected,
            signs,
            magnitudes,
        )
        .map_err(EncodingErr::InvalidUpdate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(boundary: usize, overflow: Overflow) -> SparseEncoder {
        let boundary = NonZeroUsize::new(boundary).unwrap();
        SparseEncoder::new(boundary, Quantization::Full, overflow).unwrap()
    }

    #[test]
    fn selects_single_outlier() {
        let mut grad = [0.01; 10];
        grad[9] = 5.;

        let update = encoder(1, Overflow::IndexOrder)
            .encode(&grad, 1., 1., 0, 0)
            .unwrap();

        assert_eq!(update.count(), 1);
        assert_eq!(update.indices(), [9]);
        assert_eq!(update.magnitudes(), [5.]);
        assert_eq!(update.signs(), [1]);
    }

    #[test]
    fn index_order_truncation() {
        let grad = [1., -4., 2., 8., -3.];
        let update = encoder(2, Overflow::IndexOrder)
            .encode(&grad, 1.5, 1., 0, 0)
            .unwrap();

        assert_eq!(update.indices(), [1, 2]);
        assert_eq!(update.signs(), [-1, 1]);
    }

    #[test]
    fn magnitude_rank_truncation() {
        let grad = [1., -4., 2., 8., -3.];
        let update = encoder(2, Overflow::MagnitudeRank)
            .encode(&grad, 1.5, 1., 0, 0)
            .unwrap();

        assert_eq!(update.indices(), [1, 3]);
        assert_eq!(update.magnitudes(), [4., 8.]);
    }

    #[test]
    fn zeros_never_selected() {
        let grad = [0., 0., 1.];
        let update = encoder(3, Overflow::IndexOrder)
            .encode(&grad, 0., 1., 0, 0)
            .unwrap();

        assert_eq!(update.indices(), [2]);
    }

    #[test]
    fn partial_discharge_scales_magnitudes() {
        let update = encoder(2, Overflow::IndexOrder)
            .encode(&[2., -4.], 1., 0.5, 3, 1)
            .unwrap();

        assert_eq!(update.magnitudes(), [1., 2.]);
        assert_eq!((update.iteration(), update.epoch()), (3, 1));
    }

    #[test]
    fn threshold_quantization() {
        let boundary = NonZeroUsize::new(4).unwrap();
        let encoder =
            SparseEncoder::new(boundary, Quantization::Threshold, Overflow::IndexOrder).unwrap();

        let update = encoder.encode(&[3., -0.5, -2.], 1., 1., 0, 0).unwrap();
        assert_eq!(update.indices(), [0, 2]);
        assert_eq!(update.magnitudes(), [1., 1.]);
        assert_eq!(update.signs(), [1, -1]);
    }
}
