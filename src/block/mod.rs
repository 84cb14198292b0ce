//! Block format implementation.
//!
//! A block contains multiple key-value entries and uses restart points
//! for efficient binary search and prefix compression.
//!
//! ## Block Format
//!
//! ```text
//! [Entry 1]
//! [Entry 2]
//! ...
//! [Entry N]
//! [Restart Point 1: fixed32]
//! [Restart Point 2: fixed32]
//! ...
//! [Restart Point M: fixed32]
//! [Num Restarts: fixed32]
//! ```
//!
//! Each entry:
//!
//! ```text
//! [shared_key_len: varint32]    // Length of shared prefix with previous key
//! [unshared_key_len: varint32]  // Length of unshared key suffix
//! [value_len: varint32]         // Length of value
//! [unshared_key: bytes]         // Key suffix
//! [value: bytes]                // Value data
//! ```
//!
//! `shared_key_len` is 0 for every entry at a restart point. The first entry
//! is always a restart point, and after every `block_restart_interval`
//! entries the next one is stored with its full key.

mod builder;
mod reader;

pub use builder::BlockBuilder;
pub use reader::{Block, BlockIterator};
