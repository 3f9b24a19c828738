mod decoder;
mod encoder;
mod quantization;

pub use decoder::{accumulate_into, decode, decode_into};
pub use encoder::{Overflow, SparseEncoder};
pub use quantization::Quantization;
