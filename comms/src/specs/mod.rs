mod encoding;
mod server;

pub use encoding::{
    ClippingSpec, EncodingSpec, OverflowSpec, QuantizationSpec, ResidualSpec, ThresholdSpec,
};
pub use server::{MergeSpec, ServerSpec};
