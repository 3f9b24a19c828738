use std::{error::Error, fmt, io};

/// The compression module's result type.
pub type Result<T> = std::result::Result<T, EncodingErr>;

/// Failures of the encoding path.
///
/// All of these are configuration or invariant violations, network failures never
/// reach this type.
#[derive(Debug)]
pub enum EncodingErr {
    EmptyGradient,
    InvalidState {
        expected: usize,
        got: usize,
    },
    LengthMismatch {
        expected: usize,
        got: usize,
    },
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    InvalidConfig(String),
    NonMonotonicIteration {
        last: u64,
        got: u64,
    },
    InvalidUpdate(io::Error),
}

impl fmt::Display for EncodingErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingErr::EmptyGradient => f.write_str("the gradient is empty"),
            EncodingErr::InvalidState { expected, got } => write!(
                f,
                "threshold state tracks {expected} elements but the gradient has {got}"
            ),
            EncodingErr::LengthMismatch { expected, got } => {
                write!(f, "length mismatch: expected {expected}, got {got}")
            }
            EncodingErr::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            EncodingErr::InvalidConfig(detail) => write!(f, "invalid config: {detail}"),
            EncodingErr::NonMonotonicIteration { last, got } => write!(
                f,
                "iteration {got} is older than the last dispatched iteration {last}"
            ),
            EncodingErr::InvalidUpdate(e) => write!(f, "invalid update: {e}"),
        }
    }
}

impl Error for EncodingErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EncodingErr::InvalidUpdate(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodingErr> for io::Error {
    fn from(value: EncodingErr) -> Self {
        match value {
            EncodingErr::InvalidUpdate(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
