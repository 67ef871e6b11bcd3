//! Capability interface to the DHT overlay.
//!
//! The experiment never routes anything itself, it only drives an [Overlay]
//! supplied at construction.

use std::{future::Future, net::SocketAddr};

use bytes::Bytes;

use crate::common::Key;

/// Expected distributed-systems failures of an overlay operation.
///
/// These are recorded as a failed data point rather than propagated.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DhtError {
    #[error("No nodes reachable")]
    NoNodesReachable,

    #[error("Value rejected: {0}")]
    ValueRejected(String),

    #[error("Operation timed out")]
    TimedOut,
}

/// Failure reported by an [Overlay] call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// An expected DHT failure, see [DhtError].
    #[error(transparent)]
    Dht(#[from] DhtError),

    /// The overlay was shut down.
    #[error("Overlay was shutdown")]
    Shutdown,

    /// Address could not be reached or is not part of the overlay.
    #[error("Unreachable address: {0}")]
    Unreachable(SocketAddr),

    #[error("{0}")]
    Other(String),
}

impl OverlayError {
    /// Returns `true` for the [DhtError] kind.
    pub fn is_dht(&self) -> bool {
        matches!(self, OverlayError::Dht(_))
    }
}

/// A handle to a running DHT overlay.
///
/// Implementations are expected to be safe for concurrent invocation; callers
/// add no locking of their own.
pub trait Overlay {
    /// Single-hop attempt to establish or refresh a connection to `address`.
    fn walk_to(&self, address: SocketAddr) -> Result<(), OverlayError>;

    /// Store `value` under `key`.
    fn store_value(&self, key: Key, value: Bytes)
        -> impl Future<Output = Result<(), OverlayError>>;

    /// Find all values stored under `key`. An empty result is not an error.
    fn find_values(&self, key: Key) -> impl Future<Output = Result<Vec<Bytes>, OverlayError>>;

    /// Announce this node under its own identity.
    ///
    /// Returns the addresses of the nodes that accepted the announcement, if
    /// the overlay reports them.
    fn store_peer(&self) -> impl Future<Output = Result<Option<Vec<SocketAddr>>, OverlayError>>;
}

impl<O: Overlay> Overlay for &O {
    fn walk_to(&self, address: SocketAddr) -> Result<(), OverlayError> {
        (**self).walk_to(address)
    }

    fn store_value(
        &self,
        key: Key,
        value: Bytes,
    ) -> impl Future<Output = Result<(), OverlayError>> {
        (**self).store_value(key, value)
    }

    fn find_values(&self, key: Key) -> impl Future<Output = Result<Vec<Bytes>, OverlayError>> {
        (**self).find_values(key)
    }

    fn store_peer(&self) -> impl Future<Output = Result<Option<Vec<SocketAddr>>, OverlayError>> {
        (**self).store_peer()
    }
}
