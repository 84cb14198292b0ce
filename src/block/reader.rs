//! Block parsing and iteration.

use crate::coding::{decode_fixed32, get_varint32};
use crate::comparator::Comparator;
use crate::config::Options;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

/// An immutable, parsed block.
///
/// Cloning is cheap: the contents and the decoded restart array are shared.
/// A `Block` is `Send + Sync`, so any number of iterators on any number of
/// threads may read it at once.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    // End of the entry region, where the restart array begins.
    restart_offset: usize,
    restarts: Arc<[u32]>,
    malformed: bool,
}

impl Block {
    /// Create a block over `data`.
    ///
    /// Never fails: if the trailer or restart array is invalid, every
    /// iterator over the block reports `Corruption`. Use [`Block::parse`] to
    /// get the error immediately.
    pub fn new(data: Bytes) -> Self {
        match parse_trailer(&data) {
            Some((restart_offset, restarts)) => Self {
                data,
                restart_offset,
                restarts: restarts.into(),
                malformed: false,
            },
            None => {
                log::warn!("Malformed block trailer ({} bytes)", data.len());
                Self {
                    data,
                    restart_offset: 0,
                    restarts: Arc::from(Vec::new()),
                    malformed: true,
                }
            }
        }
    }

    /// Create a block, failing with `Corruption` if its trailer is invalid.
    pub fn parse(data: Bytes) -> Result<Self> {
        let block = Self::new(data);
        if block.malformed {
            return Err(Error::corruption("bad block contents"));
        }
        Ok(block)
    }

    /// Get the number of restart points
    pub fn num_restarts(&self) -> usize {
        self.restarts.len()
    }

    /// Total size of the block in bytes, trailer included.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get the raw data
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the trailer failed to parse.
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Create an iterator over the block.
    ///
    /// `options` must carry the comparator the block was built with.
    pub fn iter(&self, options: &Options) -> BlockIterator {
        BlockIterator::new(self.clone(), Arc::clone(&options.comparator))
    }

    /// Look up the value stored for exactly `key`.
    pub fn get(&self, key: &[u8], options: &Options) -> Result<Option<Bytes>> {
        let mut iter = self.iter(options);
        iter.seek(key);
        if iter.valid() && options.comparator.compare(iter.key(), key) == Ordering::Equal {
            return Ok(Some(iter.value_bytes()));
        }
        iter.status()?;
        Ok(None)
    }
}

/// Splits the trailer off `data`, returning the end of the entry region and
/// the restart offsets.
///
/// There is at least one restart, the first is at offset 0, and offsets are
/// strictly increasing and point into the entry region. An empty entry
/// region only admits the single restart at 0.
fn parse_trailer(data: &[u8]) -> Option<(usize, Vec<u32>)> {
    if data.len() < 4 {
        return None;
    }
    let num_restarts = decode_fixed32(&data[data.len() - 4..])? as usize;
    let max_restarts = (data.len() - 4) / 4;
    if num_restarts == 0 || num_restarts > max_restarts {
        return None;
    }
    let restart_offset = data.len() - 4 - num_restarts * 4;

    let mut restarts = Vec::with_capacity(num_restarts);
    for i in 0..num_restarts {
        let restart = decode_fixed32(&data[restart_offset + i * 4..])?;
        let in_region =
            (restart as usize) < restart_offset || (restart == 0 && restart_offset == 0);
        let increasing = restarts.last().map_or(true, |&prev| restart > prev);
        if !in_region || !increasing {
            return None;
        }
        restarts.push(restart);
    }
    if restarts[0] != 0 {
        return None;
    }
    Some((restart_offset, restarts))
}

/// Lengths decoded from an entry's varint header.
struct EntryHeader {
    shared: usize,
    unshared: usize,
    value_len: usize,
    header_len: usize,
}

/// Decodes the header of the entry at the front of `src`, where `src` ends at
/// the end of the entry region. Returns `None` if a varint is malformed or
/// the key delta and value would overrun `src`.
fn decode_entry(src: &[u8]) -> Option<EntryHeader> {
    let (shared, n1) = get_varint32(src)?;
    let (unshared, n2) = get_varint32(&src[n1..])?;
    let (value_len, n3) = get_varint32(&src[n1 + n2..])?;
    let header_len = n1 + n2 + n3;

    let (unshared, value_len) = (unshared as usize, value_len as usize);
    if unshared.checked_add(value_len)? > src.len() - header_len {
        return None;
    }
    Some(EntryHeader {
        shared: shared as usize,
        unshared,
        value_len,
        header_len,
    })
}

/// An entry remembered while scanning forward for `prev`.
struct CachedEntry {
    offset: usize,
    next_offset: usize,
    restart_index: usize,
    key: Vec<u8>,
    value: Range<usize>,
}

/// Iterator over entries in a block.
///
/// Starts unpositioned; call one of the `seek*` methods first. Once a
/// corruption is detected the iterator stays invalid and [`status`] reports
/// it. Entries already returned before that point remain correct.
///
/// [`status`]: BlockIterator::status
pub struct BlockIterator {
    block: Block,
    comparator: Arc<dyn Comparator>,
    // Offset of the current entry.
    current: usize,
    // Offset just past the current entry.
    next_offset: usize,
    // Index of the restart point at or before `current`.
    restart_index: usize,
    key: Vec<u8>,
    value: Range<usize>,
    valid: bool,
    status: Option<Error>,
    prev_cache: Vec<CachedEntry>,
}

impl BlockIterator {
    fn new(block: Block, comparator: Arc<dyn Comparator>) -> Self {
        let status = if block.malformed {
            Some(Error::corruption("bad block contents"))
        } else {
            None
        };
        let end = block.restart_offset;
        Self {
            block,
            comparator,
            current: end,
            next_offset: end,
            restart_index: 0,
            key: Vec::new(),
            value: 0..0,
            valid: false,
            status,
            prev_cache: Vec::new(),
        }
    }

    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// `Ok` unless a corruption was detected.
    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    /// Get the current key
    pub fn key(&self) -> &[u8] {
        assert!(self.valid, "Iterator not valid");
        &self.key
    }

    /// Get the current value
    pub fn value(&self) -> &[u8] {
        assert!(self.valid, "Iterator not valid");
        &self.block.data[self.value.clone()]
    }

    /// Get the current value without copying it out of the block.
    pub fn value_bytes(&self) -> Bytes {
        assert!(self.valid, "Iterator not valid");
        self.block.data.slice(self.value.clone())
    }

    /// Seek to the first entry
    pub fn seek_to_first(&mut self) {
        if !self.begin_seek() {
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    /// Seek to the last entry
    pub fn seek_to_last(&mut self) {
        if !self.begin_seek() {
            return;
        }
        self.seek_to_restart_point(self.block.restarts.len() - 1);
        if !self.parse_next_entry() {
            return;
        }
        while self.next_offset < self.block.restart_offset {
            if !self.parse_next_entry() {
                return;
            }
        }
    }

    /// Position at the first entry whose key is >= `target`.
    ///
    /// Binary-searches the restart array for the last restart whose key is
    /// <= `target`, then scans forward from it.
    pub fn seek(&mut self, target: &[u8]) {
        if !self.begin_seek() {
            return;
        }

        let mut left = 0;
        let mut right = self.block.restarts.len() - 1;
        while left < right {
            let mid = left + (right - left + 1) / 2;
            let start = self.block.restarts[mid] as usize;
            let region = &self.block.data[start..self.block.restart_offset];
            let order = match decode_entry(region) {
                Some(h) if h.shared == 0 => {
                    let key = &region[h.header_len..h.header_len + h.unshared];
                    self.comparator.compare(key, target)
                }
                _ => {
                    self.corruption_error();
                    return;
                }
            };
            if order == Ordering::Greater {
                right = mid - 1;
            } else {
                left = mid;
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    /// Move to the next entry.
    ///
    /// Returns whether the iterator is still valid.
    pub fn next(&mut self) -> bool {
        assert!(self.valid, "Iterator not valid");
        self.prev_cache.clear();
        self.parse_next_entry()
    }

    /// Move to the previous entry.
    ///
    /// Returns whether the iterator is still valid; stepping back from the
    /// first entry leaves it invalid.
    pub fn prev(&mut self) -> bool {
        assert!(self.valid, "Iterator not valid");

        match self.prev_cache.pop() {
            Some(entry) if entry.next_offset == self.current => {
                self.current = entry.offset;
                self.next_offset = entry.next_offset;
                self.restart_index = entry.restart_index;
                self.key = entry.key;
                self.value = entry.value;
                return true;
            }
            _ => self.prev_cache.clear(),
        }

        // Scan back to a restart point strictly before the current entry
        let original = self.current;
        let mut index = self.restart_index;
        while (self.block.restarts[index] as usize) >= original {
            if index == 0 {
                self.valid = false;
                return false;
            }
            index -= 1;
        }

        // Decode forward until the entry just before `original`
        self.seek_to_restart_point(index);
        let mut cache = Vec::new();
        loop {
            if !self.parse_next_entry() {
                return false;
            }
            if self.next_offset >= original {
                break;
            }
            cache.push(CachedEntry {
                offset: self.current,
                next_offset: self.next_offset,
                restart_index: self.restart_index,
                key: self.key.clone(),
                value: self.value.clone(),
            });
        }
        if self.next_offset != original {
            // Entry boundaries disagree with the restart array.
            self.corruption_error();
            return false;
        }
        self.prev_cache = cache;
        true
    }

    /// Common preamble of the seek methods. Returns false if there is
    /// nothing to position on.
    fn begin_seek(&mut self) -> bool {
        self.prev_cache.clear();
        self.valid = false;
        self.status.is_none() && !self.block.restarts.is_empty()
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        self.next_offset = self.block.restarts[index] as usize;
        self.valid = false;
    }

    /// Decode the entry at `next_offset` and make it current.
    fn parse_next_entry(&mut self) -> bool {
        self.current = self.next_offset;
        let limit = self.block.restart_offset;
        if self.current >= limit {
            // No more entries
            self.valid = false;
            return false;
        }

        let region = &self.block.data[self.current..limit];
        let header = match decode_entry(region) {
            Some(h) if h.shared <= self.key.len() => h,
            _ => {
                self.corruption_error();
                return false;
            }
        };

        // Reconstruct key
        let key_start = header.header_len;
        self.key.truncate(header.shared);
        self.key
            .extend_from_slice(&region[key_start..key_start + header.unshared]);

        let value_start = self.current + key_start + header.unshared;
        self.value = value_start..value_start + header.value_len;
        self.next_offset = self.value.end;

        while self.restart_index + 1 < self.block.restarts.len()
            && (self.block.restarts[self.restart_index + 1] as usize) <= self.current
        {
            self.restart_index += 1;
        }
        self.valid = true;
        true
    }

    fn corruption_error(&mut self) {
        log::warn!(
            "Block corruption at offset {} of {} byte block",
            self.current,
            self.block.data.len()
        );
        self.valid = false;
        self.current = self.block.restart_offset;
        self.next_offset = self.block.restart_offset;
        self.key.clear();
        self.value = 0..0;
        self.prev_cache.clear();
        self.status = Some(Error::corruption("bad entry in block"));
    }
}
