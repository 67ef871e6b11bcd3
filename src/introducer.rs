//! Peer introduction: walk to every other participant of the experiment.

use tracing::{debug, warn};

use crate::{
    common::{PeerId, Peers},
    overlay::Overlay,
};

/// Walks from this node towards the rest of the cohort, so the overlay's
/// routing table gets to know every participant.
#[derive(Debug, Clone)]
pub struct PeerIntroducer {
    my_id: PeerId,
    peers: Peers,
}

impl PeerIntroducer {
    pub fn new(my_id: PeerId, peers: Peers) -> Self {
        Self { my_id, peers }
    }

    pub fn my_id(&self) -> PeerId {
        self.my_id
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    /// Walk to every participant except this node, in id order.
    ///
    /// A failed walk is logged and skipped. Returns how many walks the overlay
    /// accepted. Safe to call repeatedly.
    pub fn introduce<O: Overlay>(&self, overlay: &O) -> usize {
        let mut walked = 0;

        for peer in self.peers.values().filter(|peer| peer.id != self.my_id) {
            match overlay.walk_to(peer.address) {
                Ok(()) => {
                    debug!(peer = peer.id, address = %peer.address, "Walked to peer");
                    walked += 1;
                }
                Err(error) => {
                    warn!(peer = peer.id, address = %peer.address, ?error, "Failed to walk to peer");
                }
            }
        }

        debug!(walked, total = self.peers.len(), "Introduced peers");

        walked
    }
}
