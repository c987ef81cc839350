//! Session membership for the host
//!
//! This module tracks which peers are part of the session:
//! - Join and departure (explicit leave or timeout)
//! - Address lookup for incoming datagrams
//! - One reliable link per peer for ordered delivery
//! - Capacity enforcement
//!
//! Liveness is measured in session ticks rather than wall time, so a stalled
//! host never times out its peers by itself.

use log::info;
use shared::channel::ReliableLink;
use shared::{EntityId, PeerId, Tick};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// A participant of the session as the host sees it
#[derive(Debug)]
pub struct Peer {
    /// Identifier assigned by the host, also used to pick successors
    pub id: PeerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Display name sent with the join request
    pub name: String,
    /// The player entity spawned for this peer
    pub player: Option<EntityId>,
    /// Last tick we received any packet from this peer
    pub last_seen: Tick,
    /// Ordered delivery towards this peer
    pub link: ReliableLink,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr, name: String, now: Tick, resend_ticks: u32) -> Self {
        Self {
            id,
            addr,
            name,
            player: None,
            last_seen: now,
            link: ReliableLink::new(resend_ticks),
        }
    }

    /// Returns true if nothing arrived from this peer for more than `timeout_ticks`
    pub fn is_timed_out(&self, now: Tick, timeout_ticks: u32) -> bool {
        now.saturating_sub(self.last_seen) > timeout_ticks
    }
}

/// Manages all peers of the session
///
/// Peer ids start at 1 and are never reused within a session, so "lowest
/// remaining id" always picks the longest-standing peer.
pub struct PeerManager {
    /// Peers indexed by id, kept sorted for successor lookup
    peers: BTreeMap<PeerId, Peer>,
    /// Next id handed to a joining peer
    next_peer_id: u32,
    /// Maximum number of concurrent peers
    max_peers: usize,
    /// Resend interval for new reliable links
    resend_ticks: u32,
}

impl PeerManager {
    pub fn new(max_peers: usize, resend_ticks: u32) -> Self {
        Self {
            peers: BTreeMap::new(),
            next_peer_id: 1,
            max_peers,
            resend_ticks,
        }
    }

    /// Attempts to admit a new peer
    ///
    /// Returns None if the session is at capacity.
    pub fn add_peer(&mut self, addr: SocketAddr, name: &str, now: Tick) -> Option<PeerId> {
        if self.is_full() {
            return None;
        }

        let id = PeerId(self.next_peer_id);
        self.next_peer_id += 1;

        info!("{} ({}) joined from {}", id, name, addr);
        self.peers.insert(
            id,
            Peer::new(id, addr, name.to_string(), now, self.resend_ticks),
        );
        Some(id)
    }

    /// Removes a peer, returning it if it was present
    pub fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&id);
        if let Some(peer) = &peer {
            info!("{} ({}) left the session", peer.id, peer.name);
        }
        peer
    }

    /// Finds the peer sending from an address
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.peers
            .values()
            .find(|peer| peer.addr == addr)
            .map(|peer| peer.id)
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Records activity from a peer
    pub fn touch(&mut self, id: PeerId, now: Tick) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = now;
        }
    }

    /// Removes and returns every peer that went silent
    pub fn check_timeouts(&mut self, now: Tick, timeout_ticks: u32) -> Vec<Peer> {
        let timed_out: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.is_timed_out(now, timeout_ticks))
            .map(|peer| peer.id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| {
                info!("{} timed out", id);
                self.remove_peer(id)
            })
            .collect()
    }

    /// Peer ids in ascending order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// All peer ids with their addresses
    pub fn addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .map(|peer| (peer.id, peer.addr))
            .collect()
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
