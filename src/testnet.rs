//! In-process simulated overlay.
//!
//! A [Testnet] owns a cohort of simulated nodes on an actor thread. Each
//! [TestnetNode] is a cheap handle that implements [Overlay] for one of them.
//!
//! Nodes only know the nodes they walked to (or that walked to them). Stores
//! and lookups go to the [REPLICATION] known online nodes closest to the key.

use std::{
    collections::{BTreeSet, HashMap},
    net::SocketAddr,
    num::NonZeroUsize,
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use flume::{Receiver, Sender};
use lru::LruCache;
use tracing::{debug, trace};

use crate::{
    common::{Key, Peers},
    overlay::{DhtError, Overlay, OverlayError},
};

/// Largest value a node accepts, in bytes.
pub const MAX_VALUE_SIZE: usize = 1000;
/// Number of closest nodes a value or announcement is stored on.
pub const REPLICATION: usize = 8;

// Stored data per simulated node.
const MAX_KEYS: usize = 2000;
const MAX_VALUES_PER_KEY: usize = 100;

type Reply<T> = Sender<Result<T, OverlayError>>;

enum ActorMessage {
    Register(SocketAddr, Sender<Key>),
    SetOnline(SocketAddr, bool),
    Walk(SocketAddr, SocketAddr, Reply<()>),
    Store(SocketAddr, Key, Bytes, Reply<()>),
    Find(SocketAddr, Key, Reply<Vec<Bytes>>),
    StorePeer(SocketAddr, Reply<Option<Vec<SocketAddr>>>),
    Shutdown,
}

#[derive(Debug)]
/// A simulated overlay network running on its own thread.
pub struct Testnet {
    sender: Sender<ActorMessage>,
    handle: Option<JoinHandle<()>>,
    latency: Duration,
}

impl Testnet {
    /// Start an empty testnet.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();

        let handle = thread::Builder::new()
            .name("testnet".to_string())
            .spawn(move || Network::default().run(receiver))
            .ok();

        Testnet {
            sender,
            handle,
            latency: Duration::ZERO,
        }
    }

    /// Start a testnet with a node for every participant.
    pub fn from_peers(peers: &Peers) -> Result<Self, OverlayError> {
        let testnet = Testnet::new();

        for peer in peers.values() {
            testnet.node(peer.address)?;
        }

        Ok(testnet)
    }

    // === Options ===

    /// Delay every async reply of handles created afterwards by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    // === Public Methods ===

    /// Handle to the node at `address`, registering it if needed.
    pub fn node(&self, address: SocketAddr) -> Result<TestnetNode, OverlayError> {
        let (sender, receiver) = flume::bounded(1);

        self.sender
            .send(ActorMessage::Register(address, sender))
            .map_err(|_| OverlayError::Shutdown)?;
        let id = receiver.recv().map_err(|_| OverlayError::Shutdown)?;

        Ok(TestnetNode {
            address,
            id,
            latency: self.latency,
            sender: self.sender.clone(),
        })
    }

    /// Take a node offline, or bring it back. Offline nodes store nothing and
    /// answer nothing.
    pub fn set_online(&self, address: SocketAddr, online: bool) {
        let _ = self.sender.send(ActorMessage::SetOnline(address, online));
    }

    /// Stop the actor thread. Every handle fails with [OverlayError::Shutdown] afterwards.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(ActorMessage::Shutdown);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for Testnet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone)]
/// [Overlay] handle of one [Testnet] node.
pub struct TestnetNode {
    address: SocketAddr,
    id: Key,
    latency: Duration,
    sender: Sender<ActorMessage>,
}

impl TestnetNode {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn id(&self) -> &Key {
        &self.id
    }

    fn request<T>(
        &self,
        message: impl FnOnce(Reply<T>) -> ActorMessage,
    ) -> Receiver<Result<T, OverlayError>> {
        let (sender, receiver) = flume::bounded(1);

        // A failed send drops `sender`, so the receiver reports the shutdown.
        let _ = self.sender.send(message(sender));

        receiver
    }

    async fn response<T>(
        &self,
        receiver: Receiver<Result<T, OverlayError>>,
    ) -> Result<T, OverlayError> {
        let result = receiver
            .recv_async()
            .await
            .map_err(|_| OverlayError::Shutdown)?;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        result
    }
}

impl Overlay for TestnetNode {
    fn walk_to(&self, address: SocketAddr) -> Result<(), OverlayError> {
        self.request(|reply| ActorMessage::Walk(self.address, address, reply))
            .recv()
            .map_err(|_| OverlayError::Shutdown)?
    }

    async fn store_value(&self, key: Key, value: Bytes) -> Result<(), OverlayError> {
        let receiver = self.request(|reply| ActorMessage::Store(self.address, key, value, reply));
        self.response(receiver).await
    }

    async fn find_values(&self, key: Key) -> Result<Vec<Bytes>, OverlayError> {
        let receiver = self.request(|reply| ActorMessage::Find(self.address, key, reply));
        self.response(receiver).await
    }

    async fn store_peer(&self) -> Result<Option<Vec<SocketAddr>>, OverlayError> {
        let receiver = self.request(|reply| ActorMessage::StorePeer(self.address, reply));
        self.response(receiver).await
    }
}

struct SimulatedNode {
    id: Key,
    online: bool,
    known: BTreeSet<SocketAddr>,
    values: LruCache<Key, Vec<Bytes>>,
    peers: LruCache<Key, Vec<SocketAddr>>,
}

impl SimulatedNode {
    fn new() -> Self {
        let capacity = NonZeroUsize::MIN.saturating_add(MAX_KEYS - 1);

        SimulatedNode {
            id: Key::random(),
            online: true,
            known: BTreeSet::new(),
            values: LruCache::new(capacity),
            peers: LruCache::new(capacity),
        }
    }
}

/// Append `item` unless present, evicting the oldest entry beyond [MAX_VALUES_PER_KEY].
fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if items.contains(&item) {
        return;
    }
    if items.len() >= MAX_VALUES_PER_KEY {
        items.remove(0);
    }
    items.push(item);
}

#[derive(Default)]
struct Network {
    nodes: HashMap<SocketAddr, SimulatedNode>,
}

impl Network {
    fn run(mut self, receiver: Receiver<ActorMessage>) {
        while let Ok(message) = receiver.recv() {
            match message {
                ActorMessage::Shutdown => break,
                ActorMessage::Register(address, reply) => {
                    let id = self
                        .nodes
                        .entry(address)
                        .or_insert_with(SimulatedNode::new)
                        .id;
                    let _ = reply.send(id);
                }
                ActorMessage::SetOnline(address, online) => {
                    if let Some(node) = self.nodes.get_mut(&address) {
                        node.online = online;
                    }
                }
                ActorMessage::Walk(from, to, reply) => {
                    let _ = reply.send(self.walk(from, to));
                }
                ActorMessage::Store(from, key, value, reply) => {
                    let _ = reply.send(self.store(from, key, value));
                }
                ActorMessage::Find(from, key, reply) => {
                    let _ = reply.send(self.find(from, key));
                }
                ActorMessage::StorePeer(from, reply) => {
                    let _ = reply.send(self.store_peer(from));
                }
            }
        }

        debug!("Testnet actor stopped");
    }

    fn is_online(&self, address: &SocketAddr) -> bool {
        self.nodes.get(address).is_some_and(|node| node.online)
    }

    fn walk(&mut self, from: SocketAddr, to: SocketAddr) -> Result<(), OverlayError> {
        if from == to || !self.is_online(&from) || !self.is_online(&to) {
            return Err(OverlayError::Unreachable(to));
        }

        for (a, b) in [(from, to), (to, from)] {
            if let Some(node) = self.nodes.get_mut(&a) {
                node.known.insert(b);
            }
        }

        trace!(%from, %to, "Walked");

        Ok(())
    }

    /// Known online nodes of `from`, closest to `key` first.
    fn closest(&self, from: &SocketAddr, key: &Key) -> Result<Vec<SocketAddr>, DhtError> {
        let node = match self.nodes.get(from) {
            Some(node) if node.online => node,
            _ => return Err(DhtError::NoNodesReachable),
        };

        let mut candidates: Vec<(Key, SocketAddr)> = node
            .known
            .iter()
            .filter_map(|address| {
                let other = self.nodes.get(address)?;
                other.online.then_some((other.id, *address))
            })
            .collect();

        if candidates.is_empty() {
            return Err(DhtError::NoNodesReachable);
        }

        candidates.sort_by_key(|(id, _)| id.xor(key));

        Ok(candidates
            .into_iter()
            .take(REPLICATION)
            .map(|(_, address)| address)
            .collect())
    }

    fn store(&mut self, from: SocketAddr, key: Key, value: Bytes) -> Result<(), OverlayError> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(DhtError::ValueRejected(format!(
                "{} bytes exceeds {MAX_VALUE_SIZE}",
                value.len()
            ))
            .into());
        }

        let targets = self.closest(&from, &key)?;

        for address in &targets {
            if let Some(node) = self.nodes.get_mut(address) {
                push_unique(node.values.get_or_insert_mut(key, Vec::new), value.clone());
            }
        }

        trace!(%from, ?key, nodes = targets.len(), "Stored value");

        Ok(())
    }

    fn find(&mut self, from: SocketAddr, key: Key) -> Result<Vec<Bytes>, OverlayError> {
        let targets = self.closest(&from, &key)?;

        let mut found = vec![];
        for address in &targets {
            if let Some(values) = self.nodes.get_mut(address).and_then(|n| n.values.get(&key)) {
                for value in values {
                    if !found.contains(value) {
                        found.push(value.clone());
                    }
                }
            }
        }

        Ok(found)
    }

    fn store_peer(&mut self, from: SocketAddr) -> Result<Option<Vec<SocketAddr>>, OverlayError> {
        let key = match self.nodes.get(&from) {
            Some(node) => node.id,
            None => return Err(DhtError::NoNodesReachable.into()),
        };

        let targets = self.closest(&from, &key)?;

        for address in &targets {
            if let Some(node) = self.nodes.get_mut(address) {
                push_unique(node.peers.get_or_insert_mut(key, Vec::new), from);
            }
        }

        Ok(Some(targets))
    }
}
