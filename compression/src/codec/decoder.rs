use comms::EncodedUpdate;

use crate::{EncodingErr, Result};

fn check(update: &EncodedUpdate, len: usize) -> Result<()> {
    if update.tensor_len() != len {
        return Err(EncodingErr::LengthMismatch {
            expected: len,
            got: update.tensor_len(),
        });
    }

    Ok(())
}

/// Adds the values carried by `update` onto `out`.
///
/// # Returns
/// `LengthMismatch` or `IndexOutOfRange` if `update` doesn't fit `out`, in which case
/// `out` is left untouched.
pub fn accumulate_into(update: &EncodedUpdate, out: &mut [f32]) -> Result<()> {
    check(update, out.len())?;

    if let Some(&index) = update.indices().iter().find(|&&i| i as usize >= out.len()) {
        return Err(EncodingErr::IndexOutOfRange {
            index: index as usize,
            len: out.len(),
        });
    }

    for entry in update.entries() {
        out[entry.index as usize] += entry.value();
    }

    Ok(())
}

/// Reconstructs the dense tensor of `update` into `out`, zero outside the encoded positions.
pub fn decode_into(update: &EncodedUpdate, out: &mut [f32]) -> Result<()> {
    check(update, out.len())?;
    out.fill(0.);
    accumulate_into(update, out)
}

/// Reconstructs the dense tensor of `update` into a new vector of `len` elements.
pub fn decode(update: &EncodedUpdate, len: usize) -> Result<Vec<f32>> {
    let mut out = vec![0.; len];
    decode_into(update, &mut out)?;
    Ok(out)
}
