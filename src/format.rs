//! Persisting blocks through the file collaborators.
//!
//! A block is stored in a file as its contents followed by a 5-byte trailer:
//!
//! ```text
//! [contents: size bytes]
//! [block type: u8]       // 0 = stored as-is
//! [crc32: fixed32]       // over contents and the type byte
//! ```
//!
//! A [`BlockHandle`] records where the contents start and how long they are.

use crate::block::Block;
use crate::coding::{decode_fixed32, get_varint64, put_varint64, MAX_VARINT64_LEN};
use crate::config::Options;
use crate::env::{RandomAccessFile, SequentialFile, WritableFile};
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the trailer written after every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Maximum encoded length of a [`BlockHandle`].
pub const MAX_ENCODED_HANDLE_LENGTH: usize = 2 * MAX_VARINT64_LEN;

/// Block type byte for contents stored without transformation.
pub const NO_COMPRESSION: u8 = 0;

// Largest buffer reserved up front for a sequential block read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// BlockHandle represents a pointer to a block in a file.
///
/// It contains the offset and size of the block contents, excluding the
/// trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block contents in bytes
    pub size: u64,
}

impl BlockHandle {
    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Append the handle as two varint64s.
    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Encode the handle into a new buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ENCODED_HANDLE_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode a handle from the front of `src`, returning it and the number
    /// of bytes consumed.
    pub fn decode(src: &[u8]) -> Result<(Self, usize)> {
        let (offset, n1) = get_varint64(src).ok_or_else(|| Error::corruption("bad block handle"))?;
        let (size, n2) =
            get_varint64(&src[n1..]).ok_or_else(|| Error::corruption("bad block handle"))?;
        Ok((Self { offset, size }, n1 + n2))
    }

    /// Offset just past this block's trailer, where the next block starts.
    ///
    /// `None` if the handle (typically decoded from damaged bytes) points
    /// past the largest representable offset.
    pub fn end_offset(&self) -> Option<u64> {
        self.offset
            .checked_add(self.size)?
            .checked_add(BLOCK_TRAILER_SIZE as u64)
    }
}

fn block_checksum(contents: &[u8], block_type: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.update(&[block_type]);
    hasher.finalize()
}

/// Append `contents` and its trailer to `file`.
///
/// `offset` is the current length of the file; the returned handle points
/// at the contents.
pub fn write_block(file: &mut dyn WritableFile, offset: u64, contents: &[u8]) -> Result<BlockHandle> {
    file.append(contents)?;

    let mut trailer = BytesMut::with_capacity(BLOCK_TRAILER_SIZE);
    trailer.put_u8(NO_COMPRESSION);
    trailer.put_u32_le(block_checksum(contents, NO_COMPRESSION));
    file.append(&trailer)?;

    Ok(BlockHandle::new(offset, contents.len() as u64))
}

/// Split a block read from disk into its contents, checking the trailer.
fn parse_block_contents(data: Bytes, size: usize, verify_checksum: bool) -> Result<Bytes> {
    if data.len() != size + BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("truncated block read"));
    }

    let block_type = data[size];
    if verify_checksum {
        let stored = decode_fixed32(&data[size + 1..])
            .ok_or_else(|| Error::corruption("truncated block read"))?;
        let actual = block_checksum(&data[..size], block_type);
        if stored != actual {
            log::warn!(
                "Block checksum mismatch: expected {:#x}, got {:#x}",
                stored,
                actual
            );
            return Err(Error::corruption("block checksum mismatch"));
        }
    }

    match block_type {
        NO_COMPRESSION => Ok(data.slice(..size)),
        other => Err(Error::corruption_with("bad block type", &other.to_string())),
    }
}

fn handle_size(handle: &BlockHandle) -> Result<usize> {
    usize::try_from(handle.size)
        .ok()
        .and_then(|n| n.checked_add(BLOCK_TRAILER_SIZE).map(|_| n))
        .ok_or_else(|| Error::corruption("block handle size out of range"))
}

/// Read the contents of the block at `handle` with one random-access read.
pub fn read_block_contents(
    file: &dyn RandomAccessFile,
    handle: &BlockHandle,
    verify_checksum: bool,
) -> Result<Bytes> {
    let size = handle_size(handle)?;
    let data = file.read(handle.offset, size + BLOCK_TRAILER_SIZE)?;
    parse_block_contents(data, size, verify_checksum)
}

/// Read the block at `handle` and parse it.
///
/// Checksums are verified when `options.verify_checksums` is set.
pub fn read_block(
    file: &dyn RandomAccessFile,
    handle: &BlockHandle,
    options: &Options,
) -> Result<Block> {
    let contents = read_block_contents(file, handle, options.verify_checksums)?;
    Ok(Block::new(contents))
}

/// Read the next block of `size` content bytes from a sequential file.
pub fn read_block_sequential(
    file: &mut dyn SequentialFile,
    size: u64,
    options: &Options,
) -> Result<Block> {
    let size = handle_size(&BlockHandle::new(0, size))?;
    let want = size + BLOCK_TRAILER_SIZE;

    // `size` comes from a handle and may be bogus; grow as bytes arrive
    let mut data = BytesMut::with_capacity(want.min(READ_CHUNK_SIZE));
    while data.len() < want {
        let fragment = file.read(want - data.len())?;
        if fragment.is_empty() {
            break;
        }
        data.extend_from_slice(&fragment);
    }
    let contents = parse_block_contents(data.freeze(), size, options.verify_checksums)?;
    Ok(Block::new(contents))
}
