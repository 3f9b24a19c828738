use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for everything that can go wrong, or right, without the training loop noticing.
#[derive(Debug, Default)]
pub struct Diagnostics {
    received: AtomicU64,
    queued: AtomicU64,
    merged: AtomicU64,
    stale_dropped: AtomicU64,
    decode_failed: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
    send_failed: AtomicU64,
    send_timeouts: AtomicU64,
    send_dropped: AtomicU64,
}

/// A point in time copy of `Diagnostics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Updates read off inbound links.
    pub received: u64,
    /// Updates appended to the pending queue, local ones included.
    pub queued: u64,
    /// Updates folded into a drained tensor.
    pub merged: u64,
    pub stale_dropped: u64,
    /// Frames that could not be decoded.
    pub decode_failed: u64,
    /// Well formed updates from peers that may not send them.
    pub rejected: u64,
    pub sent: u64,
    pub send_failed: u64,
    pub send_timeouts: u64,
    /// Updates discarded because a peer's outbound queue was full.
    pub send_dropped: u64,
}

macro_rules! counters {
    ($($field:ident => $bump:ident),* $(,)?) => {
        impl Diagnostics {
            $(
                #[inline]
                pub fn $bump(&self, n: u64) {
                    self.$field.fetch_add(n, Ordering::Relaxed);
                }
            )*

            /// Reads every counter.
            pub fn snapshot(&self) -> DiagnosticsSnapshot {
                DiagnosticsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    received => add_received,
    queued => add_queued,
    merged => add_merged,
    stale_dropped => add_stale_dropped,
    decode_failed => add_decode_failed,
    rejected => add_rejected,
    sent => add_sent,
    send_failed => add_send_failed,
    send_timeouts => add_send_timeouts,
    send_dropped => add_send_dropped,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }
}
