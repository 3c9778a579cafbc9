//! The fixed-capacity peer collection (spec.md §4.7): allocates peer ids to new connections,
//! demultiplexes incoming datagrams by source address, and drives flush/receive across every
//! connected peer each service pass.
//!
//! Peer lookup by address is a linear scan bounded by `peer_count`, not a hash map —
//! `original_source/lib/rudp/peer/RUdpPeerPod.h` does the same, since the pool is small and
//! fixed-capacity by design (`SPEC_FULL.md` §9).

use std::net::SocketAddr;

use crate::error::PeerId;
use crate::peer::{Peer, PeerState};

/// A peer slot that became available to the application after dispatch surfaced it (a new
/// inbound connection, or a just-completed outbound one).
pub struct AvailablePeer {
    pub id: PeerId,
}

/// A peer that must be torn down: its chamber has nothing left to flush, its ZOMBIE state has
/// been observed by the application, and its slot can be recycled.
pub struct RequestPeerRemoval {
    pub id: PeerId,
}

pub struct PeerPod {
    peers: Vec<Peer>,
}

impl PeerPod {
    pub fn with_capacity(max_peers: usize) -> Self {
        let mut peers = Vec::with_capacity(max_peers);
        for _ in 0..max_peers {
            peers.push(Peer::new());
        }
        Self { peers }
    }

    pub fn capacity(&self) -> usize {
        self.peers.len()
    }

    pub fn len_in_use(&self) -> usize {
        self.peers.iter().filter(|p| p.is_in_use()).count()
    }

    /// Finds a free slot for a new peer bound to `address`, returning its id. Fails if every
    /// slot is occupied (spec.md §4.7, §7's `ResourceExhausted`).
    pub fn allocate(&mut self, address: SocketAddr) -> Option<PeerId> {
        let index = self.peers.iter().position(|p| !p.is_in_use())?;
        self.peers[index].address = Some(address);
        Some(PeerId(index))
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id.0)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id.0)
    }

    /// Looks up a peer by its remote address, used both to demultiplex incoming datagrams and to
    /// detect a duplicate CONNECT from an address already in use (spec.md §4.5's "previously
    /// connected from the same address" clause).
    pub fn find_by_address(&self, address: &SocketAddr) -> Option<PeerId> {
        self.peers.iter().position(|p| p.is_in_use() && p.address.as_ref() == Some(address)).map(PeerId)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut Peer)> {
        self.peers.iter_mut().enumerate().map(|(i, p)| (PeerId(i), p))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.peers.iter().enumerate().map(|(i, p)| (PeerId(i), p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_fails_once_capacity_is_exhausted() {
        let mut pod = PeerPod::with_capacity(1);
        let addr_a = SocketAddr::from(([127, 0, 0, 1], 1));
        let addr_b = SocketAddr::from(([127, 0, 0, 1], 2));
        let id = pod.allocate(addr_a).unwrap();
        pod.get_mut(id).unwrap().net.state = PeerState::Connecting;
        assert!(pod.allocate(addr_b).is_none());
    }

    #[test]
    fn resetting_a_zombie_frees_its_slot_for_reuse() {
        // `Host::collect_state_transitions` is the one that decides *when* a ZOMBIE peer is
        // safe to reset (only after its Disconnect event has been drained); the pool itself
        // just needs to free the slot once that reset happens.
        let mut pod = PeerPod::with_capacity(1);
        let addr = SocketAddr::from(([127, 0, 0, 1], 1));
        let id = pod.allocate(addr).unwrap();
        pod.get_mut(id).unwrap().net.state = PeerState::Zombie;
        pod.get_mut(id).unwrap().reset();
        assert!(pod.find_by_address(&addr).is_none());
        assert!(pod.allocate(addr).is_some());
    }
}
