//! The object-store seam: everything the VFS needs from the remote store,
//! expressed at block granularity.
//!
//! [`BlockStore`] is the narrow interface the file handles and the
//! serializer are written against. The production implementation is
//! [`s3::S3BlockStore`]; an in-memory implementation for tests lives in
//! [`memory`] behind the `test-utils` feature.

use bytes::Bytes;
use snafu::Snafu;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod s3;

/// Error raised by a [`BlockStore`] operation.
///
/// A missing block object is not an error: `get` models it as `None` and the
/// read path converts it to zero bytes. Everything the transport reports is
/// surfaced as [`StoreError::Transport`] and left to the caller; retry policy
/// belongs to the underlying client, not this layer.
#[derive(Debug, Snafu)]
pub enum StoreError {
    /// The object store request failed.
    #[snafu(display("object store request failed: {source}"))]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An object under a block prefix does not carry a block key.
    ///
    /// Block keys are fixed-width zero-padded decimals; anything else under
    /// the prefix means the file was written by something other than this
    /// layer, and enumeration order can no longer be trusted.
    #[snafu(display("object key {key:?} under a block prefix is not a block key"))]
    MalformedKey { key: String },
}

/// A block listed under a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Block index parsed from the object key.
    pub index: u64,
    /// Payload size of the object in bytes.
    pub size: u64,
}

/// Streamed payload chunks of a single block. Chunks are non-empty and
/// arrive in payload order.
pub type BlockChunks<'a> = Box<dyn Iterator<Item = Result<Bytes, StoreError>> + 'a>;

/// Block-granular object storage under a key prefix.
///
/// Object keys are `<prefix>/<index>` with the index zero-padded to a fixed
/// width, so lexicographic enumeration yields ascending block order.
/// Implementations are expected to be cheap to share behind an `Arc`; the
/// VFS holds no other state.
pub trait BlockStore {
    /// Fetches the payload of block `index`, or `None` if the object does
    /// not exist.
    fn get(&self, prefix: &str, index: u64) -> Result<Option<Bytes>, StoreError>;

    /// Overwrites block `index` with `payload`.
    fn put(&self, prefix: &str, index: u64, payload: Bytes) -> Result<(), StoreError>;

    /// Deletes block `index`. Deleting an absent block is not an error.
    fn delete(&self, prefix: &str, index: u64) -> Result<(), StoreError>;

    /// Deletes every object under `prefix/`.
    fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError>;

    /// Enumerates the blocks under `prefix/` in ascending index order.
    fn list(&self, prefix: &str) -> Result<Vec<BlockEntry>, StoreError>;

    /// Returns whether at least one object exists under `prefix/`.
    ///
    /// Implementations should answer this with a bounded probe rather than a
    /// full enumeration where the backend allows it.
    fn has_blocks(&self, prefix: &str) -> Result<bool, StoreError> {
        Ok(!self.list(prefix)?.is_empty())
    }

    /// Streams the payload of block `index` in non-empty chunks, without
    /// requiring the whole payload to be resident at once.
    ///
    /// An absent block streams as zero chunks.
    fn chunks(&self, prefix: &str, index: u64) -> Result<BlockChunks<'_>, StoreError>;
}

pub(crate) fn transport<E>(source: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Transport {
        source: Box::new(source),
    }
}
