//! Errors surfaced by VFS operations.

use snafu::Snafu;

use crate::store::StoreError;

/// Error returned by file-handle and VFS operations.
///
/// A missing block object never surfaces here: reads convert it to zero
/// bytes internally. Everything else is reported to the caller so the host
/// engine can translate it into an I/O error and roll back through its
/// journal. Nothing is retried at this layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VfsError {
    /// The underlying object store failed.
    #[snafu(display("object store operation failed: {source}"))]
    Store { source: StoreError },

    /// A block payload is larger than the configured block size.
    ///
    /// Blocks are written at most `block_size` bytes long, so an oversized
    /// payload means the store was corrupted or another writer used a
    /// different block size on the same prefix. There is no safe way to
    /// continue; fail fast.
    #[snafu(display(
        "block {index} holds {len} bytes, larger than the {block_size}-byte block size"
    ))]
    OversizedBlock {
        index: u64,
        len: usize,
        block_size: usize,
    },

    /// A byte range extends past the largest database SQLite can address.
    #[snafu(display("byte range [{offset}, {offset}+{len}) exceeds the maximum database size"))]
    InvalidRange { offset: u64, len: u64 },

    /// Reading the byte source being deserialized failed.
    #[snafu(display("failed reading the byte source being deserialized: {source}"))]
    Ingest { source: std::io::Error },
}
