use compression::{EncodingHandler, PooledBuf};

use crate::{ParameterServer, Result, ServerErr};

/// Produces one dense gradient per iteration.
pub trait GradientSource {
    /// Computes the gradient of the loss at `params`.
    fn produce_gradient(&mut self, params: &[f32]) -> Vec<f32>;
}

impl<F> GradientSource for F
where
    F: FnMut(&[f32]) -> Vec<f32>,
{
    fn produce_gradient(&mut self, params: &[f32]) -> Vec<f32> {
        self(params)
    }
}

/// One worker's training loop step: compute, encode, dispatch, drain, merge.
pub struct TrainingSession<G: GradientSource> {
    source: G,
    handler: EncodingHandler,
    server: ParameterServer,
}

impl<G: GradientSource> TrainingSession<G> {
    /// Creates a new `TrainingSession`.
    ///
    /// # Returns
    /// `LengthMismatch` if the handler and the server disagree on the tensor length.
    pub fn new(source: G, handler: EncodingHandler, server: ParameterServer) -> Result<Self> {
        if handler.len() != server.len() {
            return Err(ServerErr::LengthMismatch {
                expected: server.len(),
                got: handler.len(),
            });
        }

        Ok(Self {
            source,
            handler,
            server,
        })
    }

    pub fn source(&self) -> &G {
        &self.source
    }

    pub fn handler(&self) -> &EncodingHandler {
        &self.handler
    }

    pub fn server(&self) -> &ParameterServer {
        &self.server
    }

    /// Runs a single iteration.
    ///
    /// # Arguments
    /// * `params` - The current model parameters.
    /// * `iteration` - The iteration number, never decreasing.
    /// * `epoch` - The epoch number, it also advances the server's staleness watermark.
    ///
    /// # Returns
    /// The merged update of every peer, the local one included, or `None` if nothing
    /// arrived since the last step.
    pub fn step(
        &mut self,
        params: &[f32],
        iteration: u64,
        epoch: u64,
    ) -> Result<Option<PooledBuf>> {
        self.server.set_epoch(epoch);

        let grad = self.source.produce_gradient(params);
        if grad.len() != self.handler.len() {
            return Err(ServerErr::LengthMismatch {
                expected: self.handler.len(),
                got: grad.len(),
            });
        }

        self.handler.send_update(&grad, iteration, epoch)?;
        Ok(self.server.drain_merged_update())
    }
}
