use std::{error::Error, fmt, io};

use comms::PeerId;
use compression::EncodingErr;

/// The parameter server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Failures surfaced by the parameter server, the transport and the training session.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    UnregisteredPeer(PeerId),
    LengthMismatch { expected: usize, got: usize },
    Encoding(EncodingErr),
    UnexpectedMessage { got: &'static str },
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Io(e) => write!(f, "io error: {e}"),
            ServerErr::UnregisteredPeer(peer) => write!(f, "{peer} is not registered"),
            ServerErr::LengthMismatch { expected, got } => {
                write!(f, "tensor length mismatch: got {got}, expected {expected}")
            }
            ServerErr::Encoding(e) => write!(f, "encoding error: {e}"),
            ServerErr::UnexpectedMessage { got } => write!(f, "unexpected message: got {got}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Io(e) => Some(e),
            ServerErr::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodingErr> for ServerErr {
    fn from(value: EncodingErr) -> Self {
        Self::Encoding(value)
    }
}

impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) => e,
            ServerErr::Encoding(e) => e.into(),
            ServerErr::UnexpectedMessage { .. } => io::Error::new(io::ErrorKind::InvalidData, value),
            e => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}
