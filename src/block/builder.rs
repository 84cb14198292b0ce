//! Block builder: packs sorted key-value pairs into a prefix-compressed block.

use crate::coding::{put_fixed32, put_varint32, shared_prefix_len};
use crate::comparator::Comparator;
use crate::config::Options;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// BlockBuilder builds a block with prefix compression.
///
/// Keys must be added in strictly increasing order under the comparator of
/// the options the builder was created with. Every `block_restart_interval`
/// entries the key is stored in full and its offset is recorded as a restart
/// point.
///
/// ```
/// use kvblock::{Block, BlockBuilder, Options};
///
/// # fn main() -> kvblock::Result<()> {
/// let options = Options::default();
/// let mut builder = BlockBuilder::new(&options);
/// builder.add(b"apple", b"red")?;
/// builder.add(b"banana", b"yellow")?;
///
/// let block = Block::parse(bytes::Bytes::copy_from_slice(builder.finish()?))?;
/// assert_eq!(block.get(b"banana", &options)?.as_deref(), Some(&b"yellow"[..]));
/// # Ok(())
/// # }
/// ```
pub struct BlockBuilder {
    buffer: BytesMut,
    restarts: Vec<u32>,
    // Entries emitted since the last restart.
    counter: usize,
    num_entries: usize,
    finished: bool,
    last_key: Vec<u8>,
    block_restart_interval: usize,
    block_size: usize,
    comparator: Arc<dyn Comparator>,
}

impl BlockBuilder {
    /// Create a new BlockBuilder
    ///
    /// A `block_restart_interval` of 0 is treated as 1 (every entry is a
    /// restart point). Use [`Options::validate`] to reject it instead.
    pub fn new(options: &Options) -> Self {
        Self {
            buffer: BytesMut::new(),
            restarts: vec![0], // First restart point at offset 0
            counter: 0,
            num_entries: 0,
            finished: false,
            last_key: Vec::new(),
            block_restart_interval: options.block_restart_interval.max(1),
            block_size: options.block_size,
            comparator: Arc::clone(&options.comparator),
        }
    }

    /// Reset the contents as if the builder was just constructed.
    ///
    /// The allocated buffer is kept for reuse.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.num_entries = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Add a key-value pair to the block.
    ///
    /// Fails with `InvalidArgument` if the block is already finished or if
    /// `key` is not strictly greater than the previously added key. A failed
    /// call leaves the builder unchanged.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_argument("add called after finish"));
        }
        if self.num_entries > 0
            && self.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::invalid_argument_with(
                "keys must be added in strictly increasing order",
                self.comparator.name(),
            ));
        }
        if u32::try_from(key.len()).is_err() || u32::try_from(value.len()).is_err() {
            return Err(Error::invalid_argument("entry too large for a block"));
        }
        let offset = u32::try_from(self.buffer.len())
            .map_err(|_| Error::invalid_argument("block exceeds 4GiB"))?;

        let shared = if self.counter < self.block_restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            // Restart compression from a full key
            self.restarts.push(offset);
            self.counter = 0;
            0
        };
        let unshared = key.len() - shared;

        // Write entry: shared | unshared | value_len | key_suffix | value
        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, unshared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        // Update state
        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key.as_slice(), key);
        self.counter += 1;
        self.num_entries += 1;
        Ok(())
    }

    /// Finish building the block and return a view of its contents.
    ///
    /// The returned slice stays valid until the builder is reset or dropped.
    pub fn finish(&mut self) -> Result<&[u8]> {
        if self.finished {
            return Err(Error::invalid_argument("finish called twice"));
        }

        // Write restart points
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }

        // Write number of restarts
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;

        log::debug!(
            "Finished block: {} entries, {} restarts, {} bytes",
            self.num_entries,
            self.restarts.len(),
            self.buffer.len()
        );
        Ok(&self.buffer[..])
    }

    /// Finish building and take ownership of the block data.
    pub fn build(mut self) -> Result<Bytes> {
        self.finish()?;
        Ok(self.buffer.freeze())
    }

    /// Estimated size of the block if it were finished now.
    ///
    /// Exact: before `finish` this equals the length `finish` will return,
    /// afterwards it is that length.
    pub fn current_size_estimate(&self) -> usize {
        if self.finished {
            self.buffer.len()
        } else {
            self.buffer.len() + self.restarts.len() * 4 + 4
        }
    }

    /// Whether the block has reached the configured target size.
    pub fn should_finish(&self) -> bool {
        self.current_size_estimate() >= self.block_size
    }

    /// Check if no entries were added since construction or the last reset.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Number of entries added since construction or the last reset.
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// The most recently added key.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}
