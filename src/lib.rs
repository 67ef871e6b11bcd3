#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod error;

pub mod clock;
pub mod commands;
pub mod config;
pub mod driver;
pub mod introducer;
pub mod module;
pub mod overlay;
pub mod recorder;
pub mod scenario;
#[cfg(feature = "testnet")]
pub mod testnet;

pub use crate::common::{peer_table, Key, PeerDescriptor, PeerId, Peers, KEY_SIZE};
pub use bytes::Bytes;
pub use clock::ExperimentClock;
pub use commands::Commands;
pub use config::Config;
pub use driver::DhtDriver;
pub use error::{Error, Result};
pub use introducer::PeerIntroducer;
pub use module::{DhtModule, State};
pub use overlay::{DhtError, Overlay, OverlayError};
pub use recorder::{OperationKind, OperationRecord, Outcome, TimingRecorder};
pub use scenario::{RunReport, Scenario};
#[cfg(feature = "testnet")]
pub use testnet::{Testnet, TestnetNode};
