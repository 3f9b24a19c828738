use comms::specs::QuantizationSpec;
use half::f16;

/// How the magnitude of a selected element is represented on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quantization {
    /// The exact `f32` magnitude.
    #[default]
    Full,
    /// The magnitude rounded through IEEE binary16. The wire still carries `f32`, so this
    /// only trades precision, not bandwidth.
    Half,
    /// Every selected element carries the threshold itself. A zero threshold falls back to
    /// the exact magnitude, otherwise nothing could ever be sent.
    Threshold,
}

impl Quantization {
    /// Quantizes a non negative magnitude.
    ///
    /// # Arguments
    /// * `magnitude` - The magnitude to transmit.
    /// * `threshold` - The threshold this magnitude was selected with.
    pub fn quantize(self, magnitude: f32, threshold: f32) -> f32 {
        match self {
            Quantization::Full => magnitude,
            Quantization::Half => f16::from_f32(magnitude.min(f16::MAX.to_f32())).to_f32(),
            Quantization::Threshold if threshold > 0. => threshold,
            Quantization::Threshold => magnitude,
        }
    }
}

impl From<QuantizationSpec> for Quantization {
    fn from(value: QuantizationSpec) -> Self {
        match value {
            QuantizationSpec::Full => Quantization::Full,
            QuantizationSpec::Half => Quantization::Half,
            QuantizationSpec::Threshold => Quantization::Threshold,
        }
    }
}
