//! The per-open-file half of the VFS contract.
//!
//! A handle is nothing but a key prefix, a block size, and a shared store
//! reference. It caches no blocks and no metadata; every call consults the
//! store, so two handles on the same prefix always observe each other's
//! writes.

use std::cmp;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use snafu::{ResultExt, ensure};
use tracing::trace;

use crate::blocks::BlockRanges;
use crate::error::{InvalidRangeSnafu, OversizedBlockSnafu, StoreSnafu, VfsError};
use crate::store::BlockStore;

/// Byte offset of the page SQLite reserves for byte-range locks and never
/// writes, even once the database grows past it.
pub const LOCK_PAGE_OFFSET: u64 = 1 << 30;

/// Largest database SQLite can address: 4294967294 pages of 65536 bytes.
pub const MAX_DATABASE_SIZE: u64 = 4_294_967_294 * 65_536;

/// SQLite's five lock levels, least to most exclusive.
///
/// This VFS assumes a single writer at a time, so lock transitions always
/// succeed and are otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    None,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

/// Flags passed to [`S3VfsFile::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFlags {
    Normal,
    Full,
    DataOnly,
}

/// An open logical file: a sequence of block objects under a key prefix.
#[derive(Debug)]
pub struct S3VfsFile<S> {
    store: Arc<S>,
    key_prefix: String,
    block_size: usize,
}

impl<S: BlockStore> S3VfsFile<S> {
    pub(crate) fn new(store: Arc<S>, key_prefix: String, block_size: usize) -> Self {
        Self {
            store,
            key_prefix,
            block_size,
        }
    }

    /// The key prefix the blocks of this file live under.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// The block size this file is sharded with.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Reads exactly `amount` bytes starting at `offset`.
    ///
    /// Absent blocks and the missing tails of short blocks read as zero
    /// bytes. SQLite relies on this during recovery, when it reads past the
    /// current end of a short final block.
    pub fn read(&self, amount: usize, offset: u64) -> Result<Bytes, VfsError> {
        self.check_range(offset, amount as u64)?;
        trace!(
            message = "Reading byte range.",
            prefix = %self.key_prefix,
            offset,
            amount,
        );

        let mut out = BytesMut::zeroed(amount);
        let mut filled = 0;
        for range in BlockRanges::new(offset, amount as u64, self.block_size as u64) {
            if let Some(block) = self.fetch_block(range.block)? {
                let end = cmp::min(block.len(), range.start + range.len);
                if end > range.start {
                    let copied = end - range.start;
                    out[filled..filled + copied].copy_from_slice(&block[range.start..end]);
                }
            }
            filled += range.len;
        }

        Ok(out.freeze())
    }

    /// Writes `data` starting at `offset`.
    ///
    /// Whole-block writes replace the object outright; partial writes fetch
    /// the existing payload, zero-pad it up to the write position if needed,
    /// and splice the new bytes in. A failure partway through can leave some
    /// blocks updated and others not; the engine's journal is the recovery
    /// mechanism.
    pub fn write(&self, data: &[u8], offset: u64) -> Result<(), VfsError> {
        self.check_range(offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }
        trace!(
            message = "Writing byte range.",
            prefix = %self.key_prefix,
            offset,
            amount = data.len(),
        );

        // SQLite appends pages sequentially and skips the byte-lock page, so
        // the first write just past it is the one place a hole can open up
        // in the block sequence. Page size is the write's length.
        if offset == LOCK_PAGE_OFFSET + data.len() as u64 {
            self.backfill_to_lock_page(offset / self.block_size as u64)?;
        }

        let mut consumed = 0;
        for range in BlockRanges::new(offset, data.len() as u64, self.block_size as u64) {
            let chunk = &data[consumed..consumed + range.len];
            let payload = if range.start == 0 && range.len == self.block_size {
                Bytes::copy_from_slice(chunk)
            } else {
                let existing = self.fetch_block(range.block)?.unwrap_or_default();
                let mut patched = BytesMut::from(existing.as_ref());
                if patched.len() < range.start {
                    patched.resize(range.start, 0);
                }
                let end = range.start + range.len;
                if patched.len() < end {
                    patched.resize(end, 0);
                }
                patched[range.start..end].copy_from_slice(chunk);
                patched.freeze()
            };

            self.store
                .put(&self.key_prefix, range.block, payload)
                .context(StoreSnafu)?;
            consumed += range.len;
        }

        Ok(())
    }

    /// Truncates the file to exactly `new_size` payload bytes.
    ///
    /// Walks the blocks in ascending order, trims the last retained block,
    /// and deletes everything after it.
    pub fn truncate(&self, new_size: u64) -> Result<(), VfsError> {
        trace!(
            message = "Truncating file.",
            prefix = %self.key_prefix,
            new_size,
        );

        let mut total = 0u64;
        for entry in self.store.list(&self.key_prefix).context(StoreSnafu)? {
            total += entry.size;
            let keep = (entry.size + new_size).saturating_sub(total);
            if keep == 0 {
                self.store
                    .delete(&self.key_prefix, entry.index)
                    .context(StoreSnafu)?;
            } else if keep < entry.size {
                let block = self.fetch_block(entry.index)?.unwrap_or_default();
                self.store
                    .put(&self.key_prefix, entry.index, block.slice(..keep as usize))
                    .context(StoreSnafu)?;
            }
        }

        Ok(())
    }

    /// Current file size: the sum of all block payload sizes.
    ///
    /// Not the block count times the block size, because the final block may
    /// be short.
    pub fn size(&self) -> Result<u64, VfsError> {
        let entries = self.store.list(&self.key_prefix).context(StoreSnafu)?;
        Ok(entries.iter().map(|entry| entry.size).sum())
    }

    /// Durability is not separately signalled; each put is its own commit
    /// boundary.
    pub fn sync(&self, _flags: SyncFlags) -> Result<(), VfsError> {
        Ok(())
    }

    /// Single-writer design: lock transitions always succeed.
    pub fn lock(&self, _level: LockLevel) -> Result<bool, VfsError> {
        Ok(true)
    }

    pub fn unlock(&self, _level: LockLevel) -> Result<bool, VfsError> {
        Ok(true)
    }

    /// No other handle can hold a reserved lock.
    pub fn check_reserved_lock(&self) -> Result<bool, VfsError> {
        Ok(false)
    }

    /// Declines every file-control request.
    pub fn file_control(&self) -> bool {
        false
    }

    /// The handle keeps no local state, so closing is a no-op.
    pub fn close(self) {}

    /// Fetches one block, enforcing the payload-size contract.
    fn fetch_block(&self, index: u64) -> Result<Option<Bytes>, VfsError> {
        let payload = self.store.get(&self.key_prefix, index).context(StoreSnafu)?;
        if let Some(block) = &payload {
            ensure!(
                block.len() <= self.block_size,
                OversizedBlockSnafu {
                    index,
                    len: block.len(),
                    block_size: self.block_size,
                }
            );
        }
        Ok(payload)
    }

    /// Pads every short block between the byte-lock page and `first_block`
    /// (exclusive) out to the full block size.
    ///
    /// Walks backwards and stops at the first block already full: any block
    /// below it was necessarily full when it was written.
    fn backfill_to_lock_page(&self, first_block: u64) -> Result<(), VfsError> {
        let lock_page_block = LOCK_PAGE_OFFSET / self.block_size as u64;
        for index in (lock_page_block..first_block).rev() {
            let existing = self.fetch_block(index)?.unwrap_or_default();
            if existing.len() == self.block_size {
                break;
            }
            trace!(
                message = "Padding short block below the byte-lock page.",
                prefix = %self.key_prefix,
                block = index,
                len = existing.len(),
            );
            let mut padded = BytesMut::with_capacity(self.block_size);
            padded.extend_from_slice(&existing);
            padded.resize(self.block_size, 0);
            self.store
                .put(&self.key_prefix, index, padded.freeze())
                .context(StoreSnafu)?;
        }
        Ok(())
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), VfsError> {
        let in_range = offset
            .checked_add(len)
            .is_some_and(|end| end <= MAX_DATABASE_SIZE);
        ensure!(in_range, InvalidRangeSnafu { offset, len });
        Ok(())
    }
}
