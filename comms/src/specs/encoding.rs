use std::num::{NonZeroU64, NonZeroUsize};

use serde::{Deserialize, Serialize};

/// The specification for the `ThresholdAlgorithm` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSpec {
    Fixed {
        threshold: f32,
    },
    Adaptive {
        initial: f32,
        min_sparsity: f64,
        max_sparsity: f64,
        decay: f32,
    },
    TargetSparsity {
        sparsity: f64,
        smoothing: f32,
    },
}

/// How transmitted magnitudes are quantized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationSpec {
    #[default]
    Full,
    Half,
    Threshold,
}

/// Which qualifying elements survive when there are more than the boundary allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowSpec {
    #[default]
    IndexOrder,
    MagnitudeRank,
}

/// Periodic clamping of the residual to a multiple of the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClippingSpec {
    pub every: NonZeroU64,
    pub clip: f32,
}

/// The specification for the residual post processor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSpec {
    #[serde(default = "ResidualSpec::full_discharge")]
    pub discharge: f32,
    #[serde(default)]
    pub clipping: Option<ClippingSpec>,
}

impl ResidualSpec {
    fn full_discharge() -> f32 {
        1.
    }
}

impl Default for ResidualSpec {
    fn default() -> Self {
        Self {
            discharge: Self::full_discharge(),
            clipping: None,
        }
    }
}

/// The specification for an `EncodingHandler`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingSpec {
    pub len: NonZeroUsize,
    pub boundary: NonZeroUsize,
    pub threshold: ThresholdSpec,
    #[serde(default)]
    pub quantization: QuantizationSpec,
    #[serde(default)]
    pub overflow: OverflowSpec,
    #[serde(default)]
    pub residual: ResidualSpec,
    #[serde(default)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_defaults() {
        let json = r#"{
            "len": 10,
            "boundary": 2,
            "threshold": { "target_sparsity": { "sparsity": 0.1, "smoothing": 0.5 } }
        }"#;

        let spec: EncodingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.quantization, QuantizationSpec::Full);
        assert_eq!(spec.overflow, OverflowSpec::IndexOrder);
        assert_eq!(spec.residual, ResidualSpec::default());
        assert!(!spec.debug);
    }

    #[test]
    fn negative_or_zero_boundary_is_rejected() {
        let zero = r#"{"len":10,"boundary":0,"threshold":{"fixed":{"threshold":1.0}}}"#;
        let negative = r#"{"len":10,"boundary":-1,"threshold":{"fixed":{"threshold":1.0}}}"#;

        assert!(serde_json::from_str::<EncodingSpec>(zero).is_err());
        assert!(serde_json::from_str::<EncodingSpec>(negative).is_err());
    }
}
