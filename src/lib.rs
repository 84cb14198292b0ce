//! # kvblock - Restart-Point Block Codec for LSM-Tree Tables
//!
//! kvblock implements the block format at the heart of a LevelDB-style
//! sorted table: a run of key-value pairs, prefix-compressed against each
//! other, with a trailing array of restart points that lets a reader
//! binary-search the block without decoding all of it.
//!
//! ## Components
//!
//! - **BlockBuilder**: packs strictly increasing key-value pairs into a block
//! - **Block / BlockIterator**: parses a block and supports forward,
//!   backward and seek traversal, reporting corruption instead of reading
//!   out of bounds
//! - **Options / Comparator**: restart interval and key order, shared by
//!   builder and reader
//! - **Env**: the file, lock, scheduling and clock abstraction blocks are
//!   persisted through, with on-disk and in-memory implementations
//!
//! ## Example Usage
//!
//! ```rust
//! use kvblock::{Block, BlockBuilder, Options};
//!
//! # fn main() -> Result<(), kvblock::Error> {
//! let options = Options::default().block_restart_interval(2);
//!
//! let mut builder = BlockBuilder::new(&options);
//! builder.add(b"a", b"v1")?;
//! builder.add(b"ab", b"v2")?;
//! builder.add(b"abc", b"v3")?;
//! builder.add(b"b", b"v4")?;
//! let block = Block::parse(builder.build()?)?;
//!
//! let mut iter = block.iter(&options);
//! iter.seek(b"ab");
//! assert_eq!(iter.value(), b"v2");
//!
//! iter.seek_to_first();
//! while iter.valid() {
//!     println!("{:?} => {:?}", iter.key(), iter.value());
//!     iter.next();
//! }
//! iter.status()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod block;
pub mod coding;
pub mod comparator;
pub mod config;
pub mod env;
pub mod error;
pub mod format;

// Re-exports
pub use block::{Block, BlockBuilder, BlockIterator};
pub use comparator::{BytewiseComparator, Comparator, ReverseBytewiseComparator};
pub use config::Options;
pub use env::{default_env, Env, EnvWrapper, MemEnv, PosixEnv};
pub use error::{status_string, Error, ErrorKind, Result};
pub use format::{read_block, read_block_sequential, write_block, BlockHandle};
