//! Overlay key: a DHT lookup target or node id
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of keys in bytes.
pub const KEY_SIZE: usize = 20;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Key addressing a value (or a node) in the overlay's keyspace.
pub struct Key([u8; KEY_SIZE]);

impl Key {
    pub fn random() -> Key {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; KEY_SIZE] = rng.gen();

        Key(random_bytes)
    }

    /// Create a new Key from some bytes. Returns Err if `bytes` is not of length
    /// [KEY_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Key> {
        let bytes = bytes.as_ref();
        if bytes.len() != KEY_SIZE {
            return Err(Error::MalformedKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut tmp: [u8; KEY_SIZE] = [0; KEY_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Key(tmp))
    }

    /// Decode a Key from its hex representation.
    ///
    /// Fails with [Error::MalformedKey] if `text` is not valid hex, or does not
    /// decode to exactly [KEY_SIZE] bytes.
    pub fn from_hex(text: &str) -> Result<Key> {
        let bytes = hex::decode(text)
            .map_err(|error| Error::MalformedKey(format!("{text:?}: {error}")))?;

        Key::from_bytes(bytes)
    }

    /// Full XOR metric, usable as a sort key for closeness to a target.
    pub fn xor(&self, other: &Key) -> [u8; KEY_SIZE] {
        let mut out = [0; KEY_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Key> {
        Key::from_hex(s)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}
