use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use comms::{EncodedUpdate, PeerId};
use log::{debug, info, trace, warn};

use crate::{
    BufferPool, EncodingErr, Result, ResidualPostProcessor, SparseEncoder, ThresholdAlgorithm,
    ThresholdState, UpdateSink,
};

/// The steps a single iteration goes through, strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ResidualApplied,
    ThresholdComputed,
    Encoded,
    Dispatched,
    ResidualUpdated,
}

impl Phase {
    /// The phase that must follow this one.
    pub fn next(self) -> Self {
        match self {
            Phase::Idle => Phase::ResidualApplied,
            Phase::ResidualApplied => Phase::ThresholdComputed,
            Phase::ThresholdComputed => Phase::Encoded,
            Phase::Encoded => Phase::Dispatched,
            Phase::Dispatched => Phase::ResidualUpdated,
            Phase::ResidualUpdated => Phase::Idle,
        }
    }
}

/// The outcome of a successful `send_update`.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// The value of the dispatch counter attached to this update.
    pub update_id: u64,
    pub threshold: f32,
    pub update: EncodedUpdate,
}

/// Turns one dense gradient per iteration into a sparse update and hands it to its sinks.
///
/// The residual and the threshold statistics are owned exclusively by the handler, which
/// is meant to be driven by a single training thread.
pub struct EncodingHandler {
    peer: PeerId,
    len: usize,
    algorithm: Box<dyn ThresholdAlgorithm>,
    state: ThresholdState,
    residual: ResidualPostProcessor,
    encoder: SparseEncoder,
    sinks: Vec<Box<dyn UpdateSink>>,
    pool: Arc<BufferPool>,
    counter: Arc<AtomicU64>,
    last_iteration: Option<u64>,
    phase: Phase,
    debug: bool,
}

impl EncodingHandler {
    /// Creates a new `EncodingHandler` without sinks.
    ///
    /// # Arguments
    /// * `peer` - The identity updates are tagged with.
    /// * `algorithm` - The threshold algorithm.
    /// * `residual` - The residual post processor, its length fixes the gradient length.
    /// * `encoder` - The sparse encoder.
    /// * `pool` - The pool the per iteration scratch buffers are drawn from.
    pub fn new(
        peer: PeerId,
        algorithm: Box<dyn ThresholdAlgorithm>,
        residual: ResidualPostProcessor,
        encoder: SparseEncoder,
        pool: Arc<BufferPool>,
    ) -> Self {
        let len = residual.residual().len();

        Self {
            peer,
            len,
            algorithm,
            state: ThresholdState::new(len),
            residual,
            encoder,
            sinks: Vec::new(),
            pool,
            counter: Arc::new(AtomicU64::new(0)),
            last_iteration: None,
            phase: Phase::Idle,
            debug: false,
        }
    }

    /// Adds a sink, every update is dispatched to all sinks in insertion order.
    pub fn add_sink(&mut self, sink: Box<dyn UpdateSink>) {
        self.sinks.push(sink);
    }

    /// Enables per iteration statistics at `info` level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn residual(&self) -> &ResidualPostProcessor {
        &self.residual
    }

    pub fn threshold_state(&self) -> &ThresholdState {
        &self.state
    }

    /// The amount of updates dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// A shared handle to the dispatch counter, readable from other threads.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.counter)
    }

    /// Encodes `grad` and dispatches the result to every sink.
    ///
    /// The caller's gradient is never modified, the residual is applied to a pooled copy.
    /// If a sink fails the iteration still completes, so the residual stays consistent
    /// with what the other sinks received, and the first sink error is returned.
    ///
    /// # Arguments
    /// * `grad` - The dense gradient of this iteration.
    /// * `iteration` - Must not be lower than the last dispatched iteration.
    /// * `epoch` - The current epoch of this worker.
    ///
    /// # Returns
    /// The dispatched update, or a configuration error.
    pub fn send_update(&mut self, grad: &[f32], iteration: u64, epoch: u64) -> Result<Dispatch> {
        let res = self.run_iteration(grad, iteration, epoch);
        self.phase = Phase::Idle;
        res
    }

    fn run_iteration(&mut self, grad: &[f32], iteration: u64, epoch: u64) -> Result<Dispatch> {
        if grad.len() != self.len {
            return Err(EncodingErr::LengthMismatch {
                expected: self.len,
                got: grad.len(),
            });
        }

        if let Some(last) = self.last_iteration.filter(|&last| iteration < last) {
            return Err(EncodingErr::NonMonotonicIteration {
                last,
                got: iteration,
            });
        }

        let mut adjusted = self.pool.checkout_copy(grad);

        self.residual.apply(&mut adjusted)?;
        self.advance(Phase::ResidualApplied);

        let threshold = self
            .algorithm
            .compute_threshold(&adjusted, &mut self.state)?;
        self.advance(Phase::ThresholdComputed);

        let discharge = self.residual.discharge();
        let update = self
            .encoder
            .encode(&adjusted, threshold, discharge, iteration, epoch)?;
        self.state.record_sparsity(update.count());
        self.advance(Phase::Encoded);

        let update_id = self.counter.fetch_add(1, Ordering::AcqRel);
        let mut failure = None;

        for sink in &self.sinks {
            if let Err(e) = sink.dispatch(self.peer, &update) {
                warn!(update_id = update_id; "sink rejected update: {e}");
                failure.get_or_insert(e);
            }
        }
        self.advance(Phase::Dispatched);

        self.residual.update(&adjusted, &update)?;
        self.residual.post_process(iteration, threshold);
        self.advance(Phase::ResidualUpdated);

        self.last_iteration = Some(iteration);

        if self.debug {
            info!(
                iteration = iteration, epoch = epoch;
                "threshold={threshold} sent={}/{} residual_norm={}",
                update.count(),
                self.len,
                self.residual.l2_norm()
            );
        } else {
            debug!(iteration = iteration, update_id = update_id; "dispatched {} entries", update.count());
        }

        self.advance(Phase::Idle);

        match failure {
            Some(e) => Err(e),
            None => Ok(Dispatch {
                update_id,
                threshold,
                update,
            }),
        }
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), to, "skipped a phase");
        trace!("phase {:?} -> {:?}", self.phase, to);
        self.phase = to;
    }

    /// Forgets the residual and the threshold statistics, used on explicit restarts.
    pub fn reset(&mut self) {
        self.residual.reset();
        self.state.reset();
        self.last_iteration = None;
    }
}
