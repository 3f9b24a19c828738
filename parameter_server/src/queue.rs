use std::mem;

use comms::{EncodedUpdate, PeerId};
use parking_lot::Mutex;

/// A received update tagged with its sender.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub sender: PeerId,
    pub update: EncodedUpdate,
}

impl PendingUpdate {
    pub fn epoch(&self) -> u64 {
        self.update.epoch()
    }

    pub fn iteration(&self) -> u64 {
        self.update.iteration()
    }
}

/// The only structure written by more than one thread: receive loops and the local sink
/// push, the training thread drains.
#[derive(Debug, Default)]
pub struct PendingUpdateQueue {
    updates: Mutex<Vec<PendingUpdate>>,
}

impl PendingUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, pending: PendingUpdate) {
        self.updates.lock().push(pending);
    }

    /// Takes every queued update, leaving the queue empty.
    pub fn drain(&self) -> Vec<PendingUpdate> {
        mem::take(&mut *self.updates.lock())
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn pending(sender: u64) -> PendingUpdate {
        let update = EncodedUpdate::new(0, 0, 1, 4, vec![sender as u32], vec![1], vec![1.]).unwrap();
        PendingUpdate {
            sender: PeerId(sender),
            update,
        }
    }

    #[test]
    fn concurrent_push_then_drain() {
        let queue = Arc::new(PendingUpdateQueue::new());

        let handles: Vec<_> = (0..4)
            .map(|sender| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..25 {
                        queue.push(pending(sender));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
        assert_eq!(queue.drain().len(), 100);
        assert!(queue.is_empty());
    }
}
