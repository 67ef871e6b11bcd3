//! Miscellaneous common structs used throughout the library.

mod key;
mod peer;

pub use key::*;
pub use peer::*;
