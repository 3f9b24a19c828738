//! Peer registry, pending update merging and network transport for compressed gradient
//! exchange between workers.

mod diagnostics;
mod error;
mod merge;
mod queue;
mod registry;
mod server;
mod session;
mod transport;
mod wired;

pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{Result, ServerErr};
pub use merge::{MergePolicy, Merger};
pub use queue::{PendingUpdate, PendingUpdateQueue};
pub use registry::{PeerRegistry, PeerState};
pub use server::ParameterServer;
pub use session::{GradientSource, TrainingSession};
pub use transport::PeerTransport;
pub use wired::{local_handler, wired_handler};
