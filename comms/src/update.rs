//! The sparse update exchanged between peers.

use std::io;

/// A single transmitted element of an `EncodedUpdate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseEntry {
    pub index: u32,
    pub sign: i8,
    pub magnitude: f32,
}

impl SparseEntry {
    /// The signed value this entry reconstructs to.
    pub fn value(&self) -> f32 {
        self.sign as f32 * self.magnitude
    }
}

/// A compact sparse representation of a dense gradient.
///
/// Entries are stored as parallel arrays so they can be framed without
/// copying. Once constructed an update can't be mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedUpdate {
    iteration: u64,
    epoch: u64,
    boundary: u32,
    len: u32,
    indices: Vec<u32>,
    signs: Vec<i8>,
    magnitudes: Vec<f32>,
}

impl EncodedUpdate {
    /// Creates a new `EncodedUpdate`.
    ///
    /// # Arguments
    /// * `iteration` - The iteration of the worker that produced it.
    /// * `epoch` - The epoch of the worker that produced it.
    /// * `boundary` - The maximum amount of entries allowed.
    /// * `len` - The length of the dense tensor this update applies to.
    /// * `indices` - The position of every entry.
    /// * `signs` - The sign of every entry, either `-1` or `1`.
    /// * `magnitudes` - The non negative magnitude of every entry.
    ///
    /// # Returns
    /// The update or an `io::Error` of kind `InvalidInput` if the entries violate any
    /// of the invariants above.
    pub fn new(
        iteration: u64,
        epoch: u64,
        boundary: u32,
        len: u32,
        indices: Vec<u32>,
        signs: Vec<i8>,
        magnitudes: Vec<f32>,
    ) -> io::Result<Self> {
        let invalid = |detail: String| Err(io::Error::new(io::ErrorKind::InvalidInput, detail));

        let count = indices.len();
        if signs.len() != count || magnitudes.len() != count {
            return invalid(format!(
                "entry arrays differ in length: {count} indices, {} signs, {} magnitudes",
                signs.len(),
                magnitudes.len()
            ));
        }

        if count > boundary as usize {
            return invalid(format!("{count} entries exceed the boundary of {boundary}"));
        }

        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return invalid(format!("index {index} out of range for length {len}"));
        }

        if let Some(&sign) = signs.iter().find(|&&s| s != 1 && s != -1) {
            return invalid(format!("invalid sign {sign}"));
        }

        if let Some(&magnitude) = magnitudes.iter().find(|m| !m.is_finite() || **m < 0.) {
            return invalid(format!("invalid magnitude {magnitude}"));
        }

        Ok(Self {
            iteration,
            epoch,
            boundary,
            len,
            indices,
            signs,
            magnitudes,
        })
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn boundary(&self) -> u32 {
        self.boundary
    }

    /// The length of the dense tensor this update applies to.
    pub fn tensor_len(&self) -> usize {
        self.len as usize
    }

    /// The amount of transmitted entries.
    pub fn count(&self) -> usize {
        self.indices.len()
    }

    /// Whether this update carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn signs(&self) -> &[i8] {
        &self.signs
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Iterates over the entries in the order they were encoded.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = SparseEntry> + '_ {
        self.indices
            .iter()
            .zip(&self.signs)
            .zip(&self.magnitudes)
            .map(|((&index, &sign), &magnitude)| SparseEntry {
                index,
                sign,
                magnitude,
            })
    }

    /// The sum of all the signed values carried by this update.
    pub fn mass(&self) -> f64 {
        self.entries().map(|e| e.value() as f64).sum()
    }
}
