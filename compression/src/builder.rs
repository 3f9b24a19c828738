use std::sync::Arc;

use comms::{
    PeerId,
    specs::{EncodingSpec, ResidualSpec, ThresholdSpec},
};

use crate::{
    AdaptiveThreshold, BufferPool, Clipping, EncodingHandler, FixedThreshold, Result,
    ResidualPostProcessor, SparseEncoder, TargetSparsityThreshold, ThresholdAlgorithm,
    UpdateSink,
};

/// The amount of idle scratch buffers a handler keeps around by default.
const DEFAULT_POOL_RETAIN: usize = 4;

/// Builds `EncodingHandler`s given a specification.
#[derive(Clone)]
pub struct HandlerBuilder {
    pool: Option<Arc<BufferPool>>,
}

impl HandlerBuilder {
    /// Creates a new `HandlerBuilder`.
    ///
    /// # Returns
    /// A new `HandlerBuilder` instance.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Shares `pool` with every handler built from now on.
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Builds a new `EncodingHandler` following a spec.
    ///
    /// # Arguments
    /// * `peer` - The identity of the local worker.
    /// * `spec` - The specification of the handler.
    /// * `sinks` - Where the encoded updates are dispatched to, in order.
    ///
    /// # Returns
    /// A new handler or `InvalidConfig` if the specification has invalid values.
    pub fn build(
        &self,
        peer: PeerId,
        spec: &EncodingSpec,
        sinks: Vec<Box<dyn UpdateSink>>,
    ) -> Result<EncodingHandler> {
        let algorithm = self.resolve_threshold(spec.threshold)?;
        let residual = self.resolve_residual(spec.len.get(), spec.residual)?;
        let encoder = SparseEncoder::new(
            spec.boundary,
            spec.quantization.into(),
            spec.overflow.into(),
        )?;

        let pool = self
            .pool
            .clone()
            .unwrap_or_else(|| BufferPool::new(DEFAULT_POOL_RETAIN));

        let mut handler =
            EncodingHandler::new(peer, algorithm, residual, encoder, pool).with_debug(spec.debug);

        for sink in sinks {
            handler.add_sink(sink);
        }

        Ok(handler)
    }

    /// Resolves the `ThresholdAlgorithm` for this handler.
    ///
    /// # Arguments
    /// * `spec` - The threshold specification.
    ///
    /// # Returns
    /// A boxed threshold algorithm.
    fn resolve_threshold(&self, spec: ThresholdSpec) -> Result<Box<dyn ThresholdAlgorithm>> {
        let algorithm: Box<dyn ThresholdAlgorithm> = match spec {
            ThresholdSpec::Fixed { threshold } => Box::new(FixedThreshold::new(threshold)?),
            ThresholdSpec::Adaptive {
                initial,
                min_sparsity,
                max_sparsity,
                decay,
            } => Box::new(AdaptiveThreshold::new(
                initial,
                min_sparsity,
                max_sparsity,
                decay,
            )?),
            ThresholdSpec::TargetSparsity {
                sparsity,
                smoothing,
            } => Box::new(TargetSparsityThreshold::new(sparsity, smoothing)?),
        };

        Ok(algorithm)
    }

    fn resolve_residual(&self, len: usize, spec: ResidualSpec) -> Result<ResidualPostProcessor> {
        let residual = ResidualPostProcessor::new(len, spec.discharge)?;

        match spec.clipping {
            Some(clipping) => residual.with_clipping(Clipping {
                every: clipping.every,
                clip: clipping.clip,
            }),
            None => Ok(residual),
        }
    }
}

impl Default for HandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EncodingErr;

    fn spec(json: &str) -> EncodingSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_from_spec() {
        let spec = spec(
            r#"{
                "len": 8,
                "boundary": 2,
                "threshold": { "target_sparsity": { "sparsity": 0.25, "smoothing": 1.0 } },
                "residual": { "discharge": 0.5 }
            }"#,
        );

        let handler = HandlerBuilder::new().build(PeerId(3), &spec, Vec::new()).unwrap();

        assert_eq!(handler.len(), 8);
        assert_eq!(handler.peer(), PeerId(3));
        assert_eq!(handler.residual().discharge(), 0.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let spec = spec(
            r#"{
                "len": 8,
                "boundary": 2,
                "threshold": { "fixed": { "threshold": -1.0 } }
            }"#,
        );

        let res = HandlerBuilder::new().build(PeerId(0), &spec, Vec::new());
        assert!(matches!(res, Err(EncodingErr::InvalidConfig(_))));
    }
}
