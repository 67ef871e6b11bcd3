//! Participants of an experiment cohort
use std::{collections::BTreeMap, net::SocketAddr};

/// Numeric id the experiment runtime assigns to each participant.
pub type PeerId = u32;

/// Participant table, ordered by id.
pub type Peers = BTreeMap<PeerId, PeerDescriptor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A participant of the experiment, as supplied by the experiment runtime.
pub struct PeerDescriptor {
    pub id: PeerId,
    pub address: SocketAddr,
}

impl PeerDescriptor {
    /// Creates a new PeerDescriptor from an id and socket address.
    pub fn new(id: PeerId, address: SocketAddr) -> PeerDescriptor {
        PeerDescriptor { id, address }
    }
}

/// Collect descriptors into a [Peers] table. Later duplicates of an id win.
pub fn peer_table<I: IntoIterator<Item = PeerDescriptor>>(peers: I) -> Peers {
    peers.into_iter().map(|peer| (peer.id, peer)).collect()
}
