//! Configuration options shared by block builders and readers.

use crate::comparator::{BytewiseComparator, Comparator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of entries between restart points.
pub const DEFAULT_BLOCK_RESTART_INTERVAL: usize = 16;

/// Default target block size (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

fn default_comparator() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

/// Options for building and reading blocks.
///
/// The same options (in particular the same comparator) must be used to read
/// a block as were used to build it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Number of entries between restart points for delta encoding of keys.
    /// Default: 16
    pub block_restart_interval: usize,

    /// Approximate size of user data packed per block, in bytes.
    /// Callers finish a block once its size estimate reaches this.
    /// Default: 4KB
    pub block_size: usize,

    /// Verify the checksum of every persisted block that is read back.
    /// Default: true
    pub verify_checksums: bool,

    /// Ordering of keys within a block.
    /// Default: BytewiseComparator
    #[serde(skip, default = "default_comparator")]
    pub comparator: Arc<dyn Comparator>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
            block_size: DEFAULT_BLOCK_SIZE,
            verify_checksums: true,
            comparator: default_comparator(),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the restart interval.
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    /// Sets the target block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Enables or disables checksum verification on reads.
    pub fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }

    /// Sets the key comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Parses options from JSON. Missing fields take their defaults and the
    /// comparator is always the bytewise one.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let opts: Options = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Serializes the options (without the comparator) to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.block_restart_interval == 0 {
            return Err(crate::Error::invalid_argument(
                "block_restart_interval must be > 0",
            ));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        Ok(())
    }
}
