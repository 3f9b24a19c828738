use std::sync::Arc;

use comms::{EncodedUpdate, PeerId};

use crate::Result;

/// A destination for the updates dispatched by an `EncodingHandler`.
///
/// Implementations must not block on network io, the handler calls them from the
/// training thread.
pub trait UpdateSink: Send + Sync {
    /// Hands `update` over to this sink.
    ///
    /// # Arguments
    /// * `sender` - The identity of the dispatching worker.
    /// * `update` - The encoded update, sinks that keep it around must clone it.
    ///
    /// # Returns
    /// Only configuration errors, transient failures must be handled by the sink itself.
    fn dispatch(&self, sender: PeerId, update: &EncodedUpdate) -> Result<()>;
}

impl<S: UpdateSink + ?Sized> UpdateSink for Arc<S> {
    fn dispatch(&self, sender: PeerId, update: &EncodedUpdate) -> Result<()> {
        (**self).dispatch(sender, update)
    }
}
