//! Experiment configuration.

use std::{
    collections::BTreeSet,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    common::{PeerDescriptor, PeerId, Peers},
    recorder::DEFAULT_LOG_NAME,
    Error, Result,
};

/// Participants listen on `DEFAULT_BASE_PORT + id` unless told otherwise.
pub const DEFAULT_BASE_PORT: u16 = 12000;

pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Experiment Configurations
pub struct Config {
    /// Id of this node within the cohort.
    ///
    /// Defaults to None, and must be set before the experiment starts.
    pub my_id: Option<PeerId>,
    /// Directory the timing log and `start_time.txt` are written to.
    ///
    /// Defaults to the current directory.
    pub output_dir: PathBuf,
    /// Name of the timing log inside [Config::output_dir].
    ///
    /// Defaults to [DEFAULT_LOG_NAME]
    pub log_name: String,
    /// Bound on every store, find and announce, in milliseconds.
    ///
    /// Defaults to None, where operations wait for the overlay indefinitely.
    pub operation_timeout_ms: Option<u64>,
    /// Every participant of the experiment, including this node.
    ///
    /// Defaults to an empty cohort.
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// One participant entry of [Config::peers].
pub struct PeerConfig {
    pub id: PeerId,
    /// Defaults to [DEFAULT_HOST]
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults to `DEFAULT_BASE_PORT + id`
    pub port: Option<u16>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            my_id: None,
            output_dir: PathBuf::from("."),
            log_name: DEFAULT_LOG_NAME.to_string(),
            operation_timeout_ms: None,
            peers: vec![],
        }
    }
}

impl Config {
    /// Load a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;

        Ok(config)
    }

    /// A cohort of `size` local participants, ids `1..=size`, on default ports.
    pub fn local_cohort(my_id: PeerId, size: u32) -> Self {
        Self {
            my_id: Some(my_id),
            peers: (1..=size)
                .map(|id| PeerConfig {
                    id,
                    host: default_host(),
                    port: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for peer in &self.peers {
            if !ids.insert(peer.id) {
                return Err(Error::Config(format!("duplicate peer id {}", peer.id)));
            }
        }

        if let Some(my_id) = self.my_id {
            if !self.peers.is_empty() && !ids.contains(&my_id) {
                return Err(Error::Config(format!("my_id {my_id} is not a listed peer")));
            }
        }

        if self.log_name.is_empty() {
            return Err(Error::Config("log_name is empty".to_string()));
        }

        if self.operation_timeout_ms == Some(0) {
            return Err(Error::Config("operation_timeout_ms must be positive".to_string()));
        }

        Ok(())
    }

    /// This node's id, or a [Error::Config] if it was never set.
    pub fn my_id(&self) -> Result<PeerId> {
        self.my_id
            .ok_or_else(|| Error::Config("my_id is not set".to_string()))
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(&self.log_name)
    }

    /// Resolve every participant to a [PeerDescriptor].
    pub fn peers(&self) -> Result<Peers> {
        self.peers
            .iter()
            .map(|peer| peer.resolve().map(|descriptor| (peer.id, descriptor)))
            .collect()
    }
}

impl PeerConfig {
    pub fn port(&self) -> Result<u16> {
        match self.port {
            Some(port) => Ok(port),
            None => u16::try_from(self.id)
                .ok()
                .and_then(|id| DEFAULT_BASE_PORT.checked_add(id))
                .ok_or_else(|| Error::Config(format!("no default port for peer {}", self.id))),
        }
    }

    pub fn resolve(&self) -> Result<PeerDescriptor> {
        let port = self.port()?;

        let address: SocketAddr = (self.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|error| {
                Error::Config(format!("cannot resolve {}:{port}: {error}", self.host))
            })?
            .next()
            .ok_or_else(|| Error::Config(format!("{}:{port} has no address", self.host)))?;

        Ok(PeerDescriptor::new(self.id, address))
    }
}
