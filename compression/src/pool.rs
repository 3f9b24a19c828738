use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use parking_lot::Mutex;

/// A pool of reusable `f32` scratch buffers.
///
/// Buffers are handed out zeroed through `checkout` and go back to the pool when the
/// returned `PooledBuf` is dropped, whichever way the holder's scope is left.
pub struct BufferPool {
    free: Mutex<Vec<Vec<f32>>>,
    retain: usize,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("free", &self.free.lock().len())
            .field("retain", &self.retain)
            .finish()
    }
}

impl BufferPool {
    /// Creates a new `BufferPool`.
    ///
    /// # Arguments
    /// * `retain` - The maximum amount of idle buffers kept around.
    ///
    /// # Returns
    /// A shareable pool.
    pub fn new(retain: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(retain)),
            retain,
        })
    }

    /// Checks out a zeroed buffer of `len` elements.
    pub fn checkout(self: &Arc<Self>, len: usize) -> PooledBuf {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0.);

        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Checks out a buffer holding a copy of `src`.
    pub fn checkout_copy(self: &Arc<Self>, src: &[f32]) -> PooledBuf {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(src);

        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// The amount of idle buffers currently in the pool.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn give_back(&self, buf: Vec<f32>) {
        let mut free = self.free.lock();

        if free.len() < self.retain {
            free.push(buf);
        }
    }
}

/// A buffer checked out from a `BufferPool`, derefs to `[f32]`.
pub struct PooledBuf {
    buf: Vec<f32>,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    /// Detaches the buffer from the pool, it won't be returned on drop.
    pub fn into_vec(mut self) -> Vec<f32> {
        std::mem::take(&mut self.buf)
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledBuf").field(&self.buf).finish()
    }
}

impl Deref for PooledBuf {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);

        if buf.capacity() > 0 {
            self.pool.give_back(buf);
        }
    }
}
