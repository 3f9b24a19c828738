use std::num::NonZeroUsize;

use comms::specs::MergeSpec;
use rayon::prelude::*;

use crate::queue::PendingUpdate;

/// The amount of tensor elements each rayon task merges.
const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

/// How a batch of updates is folded into a single dense tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    #[default]
    Sum,
    Average,
}

impl From<MergeSpec> for MergePolicy {
    fn from(value: MergeSpec) -> Self {
        match value {
            MergeSpec::Sum => MergePolicy::Sum,
            MergeSpec::Average => MergePolicy::Average,
        }
    }
}

/// Folds sparse updates into a dense tensor, splitting the tensor in chunks that are
/// merged in parallel.
#[derive(Debug, Clone)]
pub struct Merger {
    policy: MergePolicy,
    chunk_size: NonZeroUsize,
}

impl Merger {
    /// Creates a new `Merger`.
    ///
    /// # Arguments
    /// * `policy` - Whether the updates are summed or averaged.
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Overrides the amount of elements per parallel chunk.
    pub fn with_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Merges `updates` into `out`, which is overwritten.
    ///
    /// Every update must have been validated against `out.len()` when it was queued,
    /// entries outside of `out` are ignored. Indices are ascending, so each chunk only
    /// visits the entries that land in it.
    ///
    /// # Arguments
    /// * `updates` - The updates to merge, in any order.
    /// * `out` - The dense destination.
    pub fn merge_into(&self, updates: &[PendingUpdate], out: &mut [f32]) {
        let chunk_size = self.chunk_size.get();
        let scale = match self.policy {
            MergePolicy::Sum => 1.,
            MergePolicy::Average => 1. / updates.len().max(1) as f32,
        };

        out.par_chunks_mut(chunk_size)
            .enumerate()
            .for_each(|(i, chunk)| {
                chunk.fill(0.);
                let start = i * chunk_size;
                let end = start + chunk.len();

                for pending in updates {
                    let update = &pending.update;
                    let indices = update.indices();
                    let lo = indices.partition_point(|&j| (j as usize) < start);
                    let hi = lo + indices[lo..].partition_point(|&j| (j as usize) < end);

                    let signs = &update.signs()[lo..hi];
                    let magnitudes = &update.magnitudes()[lo..hi];
                    for ((&index, &sign), &magnitude) in
                        indices[lo..hi].iter().zip(signs).zip(magnitudes)
                    {
                        chunk[index as usize - start] += sign as f32 * magnitude;
                    }
                }

                if scale != 1. {
                    chunk.iter_mut().for_each(|v| *v *= scale);
                }
            });
    }
}
