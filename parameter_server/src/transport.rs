use std::{borrow::Cow, collections::HashMap, io, sync::Arc, time::Duration};

use comms::{
    EncodedUpdate, OnoSender, PeerId,
    msg::{Command, Msg, Payload},
    specs::ServerSpec,
};
use compression::UpdateSink;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::AsyncWrite,
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time,
};

use crate::{Diagnostics, ParameterServer, PeerRegistry, Result, ServerErr};

type Outbound = (PeerId, Arc<EncodedUpdate>);

struct Link {
    tx: mpsc::Sender<Outbound>,
    task: JoinHandle<Result<()>>,
}

struct Inner {
    id: PeerId,
    registry: Arc<PeerRegistry>,
    diagnostics: Arc<Diagnostics>,
    deadline: Duration,
    capacity: usize,
    links: Mutex<HashMap<PeerId, Link>>,
}

/// Best effort delivery of encoded updates to every registered peer.
///
/// Each outbound link has its own writer task fed through a bounded queue, so the
/// training thread never waits on the network. A full queue drops the update for that
/// peer only, and a frame that misses the send deadline closes that link only.
#[derive(Clone)]
pub struct PeerTransport {
    inner: Arc<Inner>,
}

impl PeerTransport {
    /// Creates a new `PeerTransport` without links.
    ///
    /// # Arguments
    /// * `id` - The identity of the local worker.
    /// * `registry` - The membership broadcasts are sent to.
    /// * `diagnostics` - Where send failures are counted.
    /// * `spec` - The send deadline and per peer queue capacity.
    pub fn new(
        id: PeerId,
        registry: Arc<PeerRegistry>,
        diagnostics: Arc<Diagnostics>,
        spec: &ServerSpec,
    ) -> Self {
        let inner = Inner {
            id,
            registry,
            diagnostics,
            deadline: Duration::from_millis(spec.send_deadline_ms),
            capacity: spec.peer_queue_capacity.max(1),
            links: Mutex::new(HashMap::new()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a transport sharing the membership and counters of `server`.
    pub fn for_server(server: &ParameterServer, spec: &ServerSpec) -> Self {
        Self::new(server.id(), server.registry(), server.diagnostics(), spec)
    }

    /// Binds an outbound link to `peer` and spawns its writer task.
    ///
    /// Must be called within a tokio runtime. A previous link to the same peer is closed.
    ///
    /// # Arguments
    /// * `peer` - The peer at the other end.
    /// * `tx` - The sending end of the link.
    pub fn attach<W>(&self, peer: PeerId, tx: OnoSender<W>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Inner {
            id,
            deadline,
            capacity,
            ..
        } = *self.inner;

        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let diagnostics = Arc::clone(&self.inner.diagnostics);
        let task = tokio::spawn(write_loop(tx, queue_rx, id, peer, deadline, diagnostics));

        let link = Link { tx: queue_tx, task };
        if self.inner.links.lock().insert(peer, link).is_some() {
            debug!("replaced link to {peer}");
        }
    }

    /// Opens a tcp link to `peer` at `addr`.
    pub async fn connect<A: ToSocketAddrs>(&self, peer: PeerId, addr: A) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        let (_, tx) = comms::channel(rx, tx);
        self.attach(peer, tx);

        info!("linked to {peer}");
        Ok(())
    }

    /// Whether there is an open link to `peer`.
    pub fn is_linked(&self, peer: PeerId) -> bool {
        self.inner
            .links
            .lock()
            .get(&peer)
            .is_some_and(|link| !link.tx.is_closed())
    }

    /// Queues `update` for every peer in `peers` except the local one.
    ///
    /// The update is copied once and shared by every link, failures are counted and
    /// never returned.
    ///
    /// # Arguments
    /// * `sender` - The identity the update is tagged with.
    /// * `update` - The update to send.
    /// * `peers` - The destinations.
    ///
    /// # Returns
    /// The amount of peers the update was queued for.
    pub fn broadcast(&self, sender: PeerId, update: &EncodedUpdate, peers: &[PeerId]) -> usize {
        let update = Arc::new(update.clone());
        let mut queued = 0;

        for &peer in peers {
            if peer != self.inner.id && self.offer(peer, (sender, Arc::clone(&update))) {
                queued += 1;
            }
        }

        queued
    }

    /// Queues `update` for a single peer.
    ///
    /// # Returns
    /// `UnregisteredPeer` if `peer` is not a member, transient failures are only counted.
    pub fn send_to(&self, peer: PeerId, update: &EncodedUpdate) -> Result<()> {
        if !self.inner.registry.accepts_updates(peer) {
            return Err(ServerErr::UnregisteredPeer(peer));
        }

        self.offer(peer, (self.inner.id, Arc::new(update.clone())));
        Ok(())
    }

    fn offer(&self, peer: PeerId, item: Outbound) -> bool {
        let diagnostics = &self.inner.diagnostics;
        let mut links = self.inner.links.lock();

        let Some(link) = links.get(&peer) else {
            diagnostics.add_send_failed(1);
            debug!("no link to {peer}");
            return false;
        };

        match link.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                diagnostics.add_send_dropped(1);
                debug!("outbound queue of {peer} is full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                diagnostics.add_send_failed(1);
                links.remove(&peer);
                warn!("link to {peer} is closed");
                false
            }
        }
    }

    /// Closes every link, letting each writer flush its queue and say goodbye.
    pub async fn shutdown(&self) {
        let links: Vec<_> = self.inner.links.lock().drain().collect();

        for (peer, Link { tx, task }) in links {
            drop(tx);

            match task.await {
                Ok(Ok(())) => debug!("closed link to {peer}"),
                Ok(Err(e)) => debug!("link to {peer} had already failed: {e}"),
                Err(e) => warn!("writer of {peer} did not finish: {e}"),
            }
        }
    }
}

impl UpdateSink for PeerTransport {
    fn dispatch(&self, sender: PeerId, update: &EncodedUpdate) -> compression::Result<()> {
        let peers = self.inner.registry.registered();
        let queued = self.broadcast(sender, update, &peers);
        debug!("queued iteration {} for {queued} peers", update.iteration());
        Ok(())
    }
}

/// Sends `msg`, giving up after `deadline`.
async fn send_within<W>(tx: &mut OnoSender<W>, msg: &Msg<'_>, deadline: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match time::timeout(deadline, tx.send(msg)).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("frame not sent within {deadline:?}"),
        )),
    }
}

/// Drains the outbound queue of one link until it is closed.
///
/// A frame that misses the deadline may have been partially written, so the link is
/// abandoned instead of retried.
async fn write_loop<W>(
    mut tx: OnoSender<W>,
    mut queue: mpsc::Receiver<Outbound>,
    local: PeerId,
    peer: PeerId,
    deadline: Duration,
    diagnostics: Arc<Diagnostics>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let hello = Msg::Control(Command::Connect { peer: local });
    if let Err(e) = send_within(&mut tx, &hello, deadline).await {
        diagnostics.add_send_failed(1);
        warn!("handshake with {peer} failed: {e}");
        return Err(e.into());
    }

    while let Some((sender, update)) = queue.recv().await {
        let msg = Msg::Data(Payload::Update {
            sender,
            update: Cow::Borrowed(&*update),
        });

        if let Err(e) = send_within(&mut tx, &msg, deadline).await {
            if e.kind() == io::ErrorKind::TimedOut {
                diagnostics.add_send_timeouts(1);
            } else {
                diagnostics.add_send_failed(1);
            }

            warn!("abandoned link to {peer}: {e}");
            return Err(e.into());
        }

        diagnostics.add_sent(1);
    }

    if let Err(e) = send_within(&mut tx, &Msg::Control(Command::Disconnect), deadline).await {
        debug!("goodbye to {peer} not sent: {e}");
    }

    if let Err(e) = tx.shutdown().await {
        debug!("closing the link to {peer} failed: {e}");
    }

    Ok(())
}
