use std::collections::HashMap;

use comms::PeerId;
use parking_lot::RwLock;

use crate::{Result, ServerErr};

/// The connection state of a single peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unregistered,
    Registered,
    /// An inbound link from this peer is open.
    Receiving,
    /// The last inbound link was lost without a `Disconnect`.
    Disconnected,
}

impl PeerState {
    /// Whether updates from a peer in this state may be queued.
    pub fn accepts_updates(self) -> bool {
        matches!(self, PeerState::Registered | PeerState::Receiving)
    }
}

/// The cluster membership as seen by one worker.
///
/// Registration and removal can happen at any time from any thread, senders and
/// receive loops always look at the current snapshot.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerState>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer`, a disconnected peer goes back to `Registered`.
    ///
    /// # Returns
    /// `false` if the peer was already registered.
    pub fn register(&self, peer: PeerId) -> bool {
        let mut peers = self.peers.write();

        match peers.get(&peer).copied() {
            Some(PeerState::Registered | PeerState::Receiving) => false,
            _ => {
                peers.insert(peer, PeerState::Registered);
                true
            }
        }
    }

    /// Removes `peer` from the membership.
    ///
    /// # Returns
    /// The state the peer was in.
    pub fn unregister(&self, peer: PeerId) -> PeerState {
        self.peers
            .write()
            .remove(&peer)
            .unwrap_or(PeerState::Unregistered)
    }

    pub fn state(&self, peer: PeerId) -> PeerState {
        self.peers
            .read()
            .get(&peer)
            .copied()
            .unwrap_or(PeerState::Unregistered)
    }

    pub fn accepts_updates(&self, peer: PeerId) -> bool {
        self.state(peer).accepts_updates()
    }

    /// Every peer currently accepting updates, in ascending order.
    pub fn registered(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self
            .peers
            .read()
            .iter()
            .filter(|(_, state)| state.accepts_updates())
            .map(|(&peer, _)| peer)
            .collect();

        peers.sort_unstable();
        peers
    }

    /// Marks an inbound link from `peer` as open.
    ///
    /// # Returns
    /// `UnregisteredPeer` if the peer is not a member.
    pub fn begin_receiving(&self, peer: PeerId) -> Result<()> {
        let mut peers = self.peers.write();

        match peers.get_mut(&peer) {
            Some(state) => {
                *state = PeerState::Receiving;
                Ok(())
            }
            None => Err(ServerErr::UnregisteredPeer(peer)),
        }
    }

    /// Closes the inbound link from `peer` after a graceful `Disconnect`.
    pub fn finish_receiving(&self, peer: PeerId) {
        self.transition(peer, PeerState::Receiving, PeerState::Registered);
    }

    /// Closes the inbound link from `peer` after it was lost.
    pub fn disconnect(&self, peer: PeerId) {
        self.transition(peer, PeerState::Receiving, PeerState::Disconnected);
    }

    fn transition(&self, peer: PeerId, from: PeerState, to: PeerState) {
        if let Some(state) = self.peers.write().get_mut(&peer)
            && *state == from
        {
            *state = to;
        }
    }
}
