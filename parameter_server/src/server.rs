use std::{
    borrow::Cow,
    io, mem,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use comms::{
    EncodedUpdate, OnoReceiver, OnoSender, PeerId,
    msg::{Command, Msg, Payload},
    specs::ServerSpec,
};
use compression::{BufferPool, EncodingErr, PooledBuf, UpdateSink};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinSet,
};

use crate::{
    Diagnostics, Merger, PeerRegistry, PendingUpdate, PendingUpdateQueue, Result, ServerErr,
};

/// The amount of idle dense buffers kept for merging and encoding.
const POOL_RETAIN: usize = 4;

struct Inner {
    id: PeerId,
    len: usize,
    staleness_bound: u64,
    epoch: AtomicU64,
    registry: Arc<PeerRegistry>,
    queue: PendingUpdateQueue,
    merger: Merger,
    pool: Arc<BufferPool>,
    diagnostics: Arc<Diagnostics>,
    tasks: Mutex<JoinSet<Result<()>>>,
}

/// The receiving half of a worker: it accepts updates from registered peers and from the
/// local handler, and merges them for the training loop.
///
/// Cloning is cheap, every clone is a handle to the same server.
#[derive(Clone)]
pub struct ParameterServer {
    inner: Arc<Inner>,
}

impl ParameterServer {
    /// Creates a new `ParameterServer`.
    ///
    /// # Arguments
    /// * `id` - The identity of the local worker.
    /// * `len` - The agreed length of every gradient tensor.
    /// * `spec` - The staleness and merge configuration.
    pub fn new(id: PeerId, len: usize, spec: &ServerSpec) -> Self {
        let inner = Inner {
            id,
            len,
            staleness_bound: spec.staleness_bound,
            epoch: AtomicU64::new(0),
            registry: Arc::new(PeerRegistry::new()),
            queue: PendingUpdateQueue::new(),
            merger: Merger::new(spec.merge.into()),
            pool: BufferPool::new(POOL_RETAIN),
            diagnostics: Arc::new(Diagnostics::new()),
            tasks: Mutex::new(JoinSet::new()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        Arc::clone(&self.inner.diagnostics)
    }

    /// The pool merged tensors are checked out from, handlers of this worker share it.
    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.inner.pool)
    }

    /// Adds `peer` to the membership, it may be called at any time.
    pub fn register_peer(&self, peer: PeerId) {
        if self.inner.registry.register(peer) {
            info!("registered {peer}");
        }
    }

    /// Removes `peer` from the membership, updates it sends from now on are rejected.
    pub fn unregister_peer(&self, peer: PeerId) {
        let previous = self.inner.registry.unregister(peer);
        info!("unregistered {peer}, was {previous:?}");
    }

    /// The current epoch of the local worker.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    /// Advances the local epoch, it never goes backwards.
    pub fn set_epoch(&self, epoch: u64) {
        self.inner.epoch.fetch_max(epoch, Ordering::AcqRel);
    }

    /// Appends `update` to the pending queue unless it is stale.
    ///
    /// # Arguments
    /// * `sender` - The peer that produced the update.
    /// * `update` - The update itself.
    ///
    /// # Returns
    /// Whether the update was queued, or `LengthMismatch` if it doesn't fit the tensor.
    pub fn enqueue(&self, sender: PeerId, update: EncodedUpdate) -> Result<bool> {
        self.inner.enqueue(sender, update)
    }

    /// Takes every pending update and merges them.
    ///
    /// Updates that became stale while they were waiting are dropped here.
    ///
    /// # Returns
    /// The merged tensor, or `None` if nothing usable was pending. The buffer goes back to
    /// the pool once dropped.
    pub fn drain_merged_update(&self) -> Option<PooledBuf> {
        let inner = &self.inner;
        let mut pending = inner.queue.drain();

        let before = pending.len();
        pending.retain(|p| !inner.is_stale(p.epoch()));

        let stale = before - pending.len();
        if stale > 0 {
            inner.diagnostics.add_stale_dropped(stale as u64);
            debug!("dropped {stale} updates that went stale in the queue");
        }

        if pending.is_empty() {
            return None;
        }

        let mut merged = inner.pool.checkout(inner.len);
        inner.merger.merge_into(&pending, &mut merged);
        inner.diagnostics.add_merged(pending.len() as u64);

        Some(merged)
    }

    /// Binds an inbound link and spawns its receive task.
    ///
    /// The first frame must be a `Connect` from a registered peer. After that every
    /// update is queued until the peer sends `Disconnect` or the link is lost.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the link.
    /// * `tx` - The sending end of the link, used for replies.
    pub fn spawn<R, W>(&self, rx: OnoReceiver<R>, tx: OnoSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.lock().spawn(inner.receive(rx, tx));
    }

    /// Waits for every receive task spawned so far.
    pub async fn run(&self) -> Vec<Result<()>> {
        let tasks = mem::take(&mut *self.inner.tasks.lock());
        tasks.join_all().await
    }

    /// Aborts every receive task.
    pub fn shutdown(&self) {
        self.inner.tasks.lock().abort_all();
    }
}

impl Inner {
    fn is_stale(&self, epoch: u64) -> bool {
        epoch.saturating_add(self.staleness_bound) < self.epoch.load(Ordering::Acquire)
    }

    fn enqueue(&self, sender: PeerId, update: EncodedUpdate) -> Result<bool> {
        if update.tensor_len() != self.len {
            return Err(ServerErr::LengthMismatch {
                expected: self.len,
                got: update.tensor_len(),
            });
        }

        if self.is_stale(update.epoch()) {
            self.diagnostics.add_stale_dropped(1);
            debug!(
                "dropped stale update from {sender}: epoch={} current={}",
                update.epoch(),
                self.epoch.load(Ordering::Acquire)
            );
            return Ok(false);
        }

        self.queue.push(PendingUpdate { sender, update });
        self.diagnostics.add_queued(1);
        Ok(true)
    }

    /// Handles an update read off the link opened by `link_peer`.
    fn on_update(&self, link_peer: PeerId, sender: PeerId, update: EncodedUpdate) {
        self.diagnostics.add_received(1);

        if sender != link_peer || !self.registry.accepts_updates(sender) {
            self.diagnostics.add_rejected(1);
            warn!("rejected update from {sender} on the link of {link_peer}");
            return;
        }

        if let Err(e) = self.enqueue(sender, update) {
            self.diagnostics.add_rejected(1);
            warn!("rejected update from {sender}: {e}");
        }
    }

    async fn receive<R, W>(self: Arc<Self>, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut buf: Vec<u32> = Vec::new();

        let peer = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Connect { peer }) => peer,
            msg => {
                let got = msg.kind();
                self.diagnostics.add_rejected(1);
                return Err(ServerErr::UnexpectedMessage { got });
            }
        };

        if let Err(e) = self.registry.begin_receiving(peer) {
            self.diagnostics.add_rejected(1);
            warn!("refused link: {e}");
            let reply = Msg::Err(Cow::Owned(e.to_string()));
            if let Err(e) = tx.send(&reply).await {
                debug!("refusal not delivered: {e}");
            }
            return Err(e);
        }

        info!("{peer} connected");

        loop {
            match rx.recv_into(&mut buf).await {
                Ok(Msg::Data(Payload::Update { sender, update })) => {
                    self.on_update(peer, sender, update.into_owned());
                }
                Ok(Msg::Control(Command::Disconnect)) => {
                    self.registry.finish_receiving(peer);
                    info!("{peer} disconnected");
                    if let Err(e) = tx.send(&Msg::Control(Command::Disconnect)).await {
                        debug!("disconnect echo to {peer} not delivered: {e}");
                    }
                    return Ok(());
                }
                Ok(msg) => {
                    self.diagnostics.add_rejected(1);
                    warn!("unexpected {} from {peer}", msg.kind());
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    self.diagnostics.add_decode_failed(1);
                    warn!("dropped malformed frame from {peer}: {e}");
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.registry.disconnect(peer);
                    warn!("lost link to {peer}");
                    return Ok(());
                }
                Err(e) => {
                    self.registry.disconnect(peer);
                    return Err(e.into());
                }
            }
        }
    }
}

impl UpdateSink for ParameterServer {
    fn dispatch(&self, sender: PeerId, update: &EncodedUpdate) -> compression::Result<()> {
        match self.inner.enqueue(sender, update.clone()) {
            Ok(_) => Ok(()),
            Err(ServerErr::LengthMismatch { expected, got }) => {
                Err(EncodingErr::LengthMismatch { expected, got })
            }
            Err(e) => Err(EncodingErr::InvalidConfig(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::MergeSpec;

    use super::*;

    const LEN: usize = 4;

    fn server(staleness_bound: u64) -> ParameterServer {
        let spec = ServerSpec {
            staleness_bound,
            ..Default::default()
        };
        ParameterServer::new(PeerId(0), LEN, &spec)
    }

    fn update(epoch: u64, index: u32, value: f32) -> EncodedUpdate {
        let sign = if value < 0. { -1 } else { 1 };
        EncodedUpdate::new(0, epoch, 1, LEN as u32, vec![index], vec![sign], vec![value.abs()])
            .unwrap()
    }

    #[test]
    fn drain_sums_and_empties() {
        let server = server(1);
        server.enqueue(PeerId(1), update(0, 0, 1.)).unwrap();
        server.enqueue(PeerId(2), update(0, 0, 2.)).unwrap();
        server.enqueue(PeerId(2), update(0, 3, -1.)).unwrap();

        assert_eq!(
            server.drain_merged_update().as_deref(),
            Some(&[3., 0., 0., -1.][..])
        );
        assert!(server.drain_merged_update().is_none());
        assert_eq!(server.diagnostics().snapshot().merged, 3);
    }

    #[test]
    fn average_policy() {
        let spec = ServerSpec {
            merge: MergeSpec::Average,
            ..Default::default()
        };
        let server = ParameterServer::new(PeerId(0), LEN, &spec);
        server.enqueue(PeerId(1), update(0, 1, 1.)).unwrap();
        server.enqueue(PeerId(2), update(0, 1, 3.)).unwrap();

        assert_eq!(
            server.drain_merged_update().as_deref(),
            Some(&[0., 2., 0., 0.][..])
        );
    }

    #[test]
    fn stale_on_arrival_is_dropped() {
        let server = server(1);
        server.set_epoch(5);

        assert!(!server.enqueue(PeerId(1), update(3, 0, 1.)).unwrap());
        assert!(server.enqueue(PeerId(1), update(4, 1, 1.)).unwrap());

        assert_eq!(
            server.drain_merged_update().as_deref(),
            Some(&[0., 1., 0., 0.][..])
        );
        assert_eq!(server.diagnostics().snapshot().stale_dropped, 1);
    }

    #[test]
    fn stale_while_queued_is_dropped() {
        let server = server(0);
        server.enqueue(PeerId(1), update(0, 0, 1.)).unwrap();
        server.set_epoch(1);

        assert!(server.drain_merged_update().is_none());
        assert_eq!(server.diagnostics().snapshot().stale_dropped, 1);
    }

    #[test]
    fn merged_buffer_returns_to_pool() {
        let server = server(0);
        let pool = server.pool();

        for round in 0..3 {
            server.enqueue(PeerId(1), update(0, 2, 1.)).unwrap();
            let merged = server.drain_merged_update().unwrap();

            assert_eq!(*merged, [0., 0., 1., 0.], "round {round}");
            assert_eq!(pool.idle(), 0);
            drop(merged);
            assert_eq!(pool.idle(), 1);
        }
    }

    #[test]
    fn epoch_never_goes_back() {
        let server = server(0);
        server.set_epoch(3);
        server.set_epoch(1);
        assert_eq!(server.epoch(), 3);
    }

    #[test]
    fn length_mismatch_is_a_configuration_error() {
        let server = server(0);
        let update = EncodedUpdate::new(0, 0, 1, 8, vec![5], vec![1], vec![1.]).unwrap();

        assert!(matches!(
            server.enqueue(PeerId(1), update.clone()),
            Err(ServerErr::LengthMismatch {
                expected: LEN,
                got: 8
            })
        ));
        assert!(matches!(
            server.dispatch(PeerId(0), &update),
            Err(EncodingErr::LengthMismatch { .. })
        ));
    }
}
