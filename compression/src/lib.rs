//! Threshold based sparse gradient compression with error feedback.

mod builder;
mod codec;
mod error;
mod handler;
mod pool;
mod residual;
mod sink;
mod threshold;

pub use builder::HandlerBuilder;
pub use codec::{
    Overflow, Quantization, SparseEncoder, accumulate_into, decode, decode_into,
};
pub use error::{EncodingErr, Result};
pub use handler::{Dispatch, EncodingHandler, Phase};
pub use pool::{BufferPool, PooledBuf};
pub use residual::{Clipping, ResidualPostProcessor};
pub use sink::UpdateSink;
pub use threshold::{
    AdaptiveThreshold, FixedThreshold, TargetSparsityThreshold, ThresholdAlgorithm,
    ThresholdState,
};
