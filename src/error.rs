//! Main Crate Error

use std::path::PathBuf;

use crate::module::State;
use crate::overlay::{DhtError, OverlayError};

#[derive(thiserror::Error, Debug)]
/// Dht experiment crate error enum.
pub enum Error {
    /// A key was not valid hex, or did not decode to [crate::KEY_SIZE] bytes.
    ///
    /// Raised before any overlay call, and never written to the timing log.
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// The overlay reported an expected distributed-systems failure.
    #[error(transparent)]
    DhtOperation(#[from] DhtError),

    /// Any other failure reported by the overlay.
    #[error("Unexpected overlay failure: {0}")]
    Unexpected(OverlayError),

    /// An operation was invoked before the module became [State::Active], or after it stopped.
    #[error("Experiment module is not ready: {0:?}")]
    NotReady(State),

    /// A lifecycle transition was attempted from the wrong state.
    #[error("Cannot {action} while {from:?}")]
    InvalidTransition { from: State, action: &'static str },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments {
        command: &'static str,
        reason: String,
    },

    #[error("Scenario line {line}: {reason}")]
    Scenario { line: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse log record {0:?}")]
    InvalidRecord(String),

    #[error("{path}: {source}")]
    /// [std::io::Error] annotated with the file it happened on.
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

impl From<OverlayError> for Error {
    fn from(error: OverlayError) -> Self {
        match error {
            OverlayError::Dht(dht_error) => Error::DhtOperation(dht_error),
            other => Error::Unexpected(other),
        }
    }
}

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
