//! Import and export between the sharded block layout and a contiguous
//! single-file database image.
//!
//! Because the write path backfills the blocks SQLite skips around the
//! byte-lock page and truncation trims the final block exactly, streaming
//! the block payloads back-to-back reproduces, byte for byte, the file a
//! stock SQLite would have written with the same page size.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};
use snafu::ResultExt;
use tracing::trace;

use crate::error::{IngestSnafu, StoreSnafu, VfsError};
use crate::file::MAX_DATABASE_SIZE;
use crate::store::{BlockChunks, BlockEntry, BlockStore};

/// Streams the file at `key_prefix` as a lazy sequence of non-empty byte
/// chunks.
///
/// The total number of bytes yielded equals the file size. Nothing is
/// buffered beyond one transport chunk at a time.
pub fn serialize_iter<'a, S: BlockStore>(store: &'a S, key_prefix: &str) -> SerializeIter<'a, S> {
    SerializeIter {
        store,
        key_prefix: key_prefix.to_owned(),
        state: IterState::Start,
    }
}

/// Wraps [`serialize_iter`] in a pull-style reader for consumers that want
/// `read(n)` semantics (most upload APIs).
pub fn serialize_reader<'a, S: BlockStore>(
    store: &'a S,
    key_prefix: &str,
) -> SerializeReader<'a, S> {
    SerializeReader {
        upstream: serialize_iter(store, key_prefix),
        chunk: Bytes::new(),
        cursor: 0,
    }
}

/// Ingests a contiguous database image into the block layout at
/// `key_prefix`, re-chunking it into aligned `block_size`-byte objects. The
/// final block may be short if the source ends mid-block.
///
/// Existing objects under the prefix are not deleted first; callers wanting
/// a clean overwrite must delete the prefix themselves.
///
/// Returns the number of bytes ingested.
pub fn deserialize_from<S, R>(
    store: &S,
    key_prefix: &str,
    block_size: usize,
    mut source: R,
) -> Result<u64, VfsError>
where
    S: BlockStore,
    R: Read,
{
    let mut index = 0u64;
    let mut total = 0u64;

    loop {
        let mut block = vec![0u8; block_size];
        let mut filled = 0;
        while filled < block_size {
            match source.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error).context(IngestSnafu),
            }
        }
        if filled == 0 {
            break;
        }

        block.truncate(filled);
        store
            .put(key_prefix, index, Bytes::from(block))
            .context(StoreSnafu)?;
        index += 1;
        total += filled as u64;

        if filled < block_size {
            break;
        }
    }

    trace!(
        message = "Deserialized byte source into blocks.",
        prefix = %key_prefix,
        blocks = index,
        bytes = total,
    );
    Ok(total)
}

enum IterState<'a> {
    /// Blocks not yet enumerated.
    Start,
    Streaming {
        entries: std::vec::IntoIter<BlockEntry>,
        current: Option<BlockChunks<'a>>,
    },
    Done,
}

/// Lazy chunk stream over the blocks of one file, in ascending block order.
///
/// Yields no empty chunks. The first error ends the stream.
pub struct SerializeIter<'a, S: BlockStore> {
    store: &'a S,
    key_prefix: String,
    state: IterState<'a>,
}

impl<'a, S: BlockStore> Iterator for SerializeIter<'a, S> {
    type Item = Result<Bytes, VfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, IterState::Done) {
                IterState::Start => match self.store.list(&self.key_prefix) {
                    Ok(entries) => {
                        self.state = IterState::Streaming {
                            entries: entries.into_iter(),
                            current: None,
                        };
                    }
                    Err(error) => return Some(Err(VfsError::Store { source: error })),
                },
                IterState::Streaming {
                    mut entries,
                    mut current,
                } => {
                    if let Some(chunks) = current.as_mut() {
                        match chunks.next() {
                            Some(Ok(chunk)) => {
                                self.state = IterState::Streaming { entries, current };
                                if chunk.is_empty() {
                                    continue;
                                }
                                return Some(Ok(chunk));
                            }
                            Some(Err(error)) => {
                                return Some(Err(VfsError::Store { source: error }));
                            }
                            None => current = None,
                        }
                    }
                    if current.is_none() {
                        match entries.next() {
                            Some(entry) => {
                                match self.store.chunks(&self.key_prefix, entry.index) {
                                    Ok(chunks) => {
                                        self.state = IterState::Streaming {
                                            entries,
                                            current: Some(chunks),
                                        };
                                    }
                                    Err(error) => {
                                        return Some(Err(VfsError::Store { source: error }));
                                    }
                                }
                            }
                            None => return None,
                        }
                    }
                }
                IterState::Done => return None,
            }
        }
    }
}

/// Pull-style byte source over a serialized file.
///
/// Holds the in-flight chunk and a cursor into it, and splits or joins
/// upstream chunks to honor the requested read sizes. `read` returns fewer
/// bytes than asked only at end of file.
pub struct SerializeReader<'a, S: BlockStore> {
    upstream: SerializeIter<'a, S>,
    chunk: Bytes,
    cursor: usize,
}

impl<'a, S: BlockStore> SerializeReader<'a, S> {
    /// Reads up to `amount` bytes, returning fewer only at end of file.
    pub fn read(&mut self, amount: usize) -> Result<Bytes, VfsError> {
        let mut out = BytesMut::with_capacity(amount.min(64 * 1024));
        while out.len() < amount {
            if self.cursor == self.chunk.len() && !self.refill()? {
                break;
            }
            let take = (amount - out.len()).min(self.chunk.len() - self.cursor);
            out.extend_from_slice(&self.chunk[self.cursor..self.cursor + take]);
            self.cursor += take;
        }
        Ok(out.freeze())
    }

    /// Reads everything remaining, bounded by the largest database SQLite
    /// can address.
    pub fn read_all(&mut self) -> Result<Bytes, VfsError> {
        self.read(usize::try_from(MAX_DATABASE_SIZE).unwrap_or(usize::MAX))
    }

    /// Pulls the next non-empty chunk from upstream. Returns `false` at end
    /// of file.
    fn refill(&mut self) -> Result<bool, VfsError> {
        match self.upstream.next() {
            Some(chunk) => {
                self.chunk = chunk?;
                self.cursor = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<'a, S: BlockStore> Read for SerializeReader<'a, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor == self.chunk.len() {
            match self.refill() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(error) => return Err(io::Error::other(error)),
            }
        }
        let take = buf.len().min(self.chunk.len() - self.cursor);
        buf[..take].copy_from_slice(&self.chunk[self.cursor..self.cursor + take]);
        self.cursor += take;
        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::file::S3VfsFile;
    use crate::store::memory::MemoryBlockStore;

    fn populated_store(data: &[u8], block_size: usize) -> Arc<MemoryBlockStore> {
        let store = Arc::new(MemoryBlockStore::new());
        let file = S3VfsFile::new(Arc::clone(&store), "db".into(), block_size);
        file.write(data, 0).unwrap();
        store
    }

    fn collect(store: &MemoryBlockStore, prefix: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in serialize_iter(store, prefix) {
            let chunk = chunk.unwrap();
            assert!(!chunk.is_empty());
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn serialize_of_empty_prefix_yields_nothing() {
        let store = MemoryBlockStore::new();
        assert_eq!(serialize_iter(&store, "db").count(), 0);
    }

    #[test]
    fn serialize_streams_whole_file_in_order() {
        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let store = populated_store(&data, 4096);
        assert_eq!(collect(&store, "db"), data);
    }

    #[test]
    fn serialized_length_equals_file_size() {
        let data = vec![5u8; 9000];
        let store = populated_store(&data, 4096);
        let file = S3VfsFile::new(Arc::clone(&store), "db".into(), 4096);
        assert_eq!(collect(&store, "db").len() as u64, file.size().unwrap());
    }

    #[test]
    fn reader_returns_exact_amounts_until_eof() {
        let data: Vec<u8> = (0..5000).map(|i| (i % 241) as u8).collect();
        let store = populated_store(&data, 1000);

        let mut reader = serialize_reader(&*store, "db");
        let mut out = Vec::new();
        loop {
            // An awkward read size that never divides the chunk size.
            let piece = reader.read(777).unwrap();
            if piece.is_empty() {
                break;
            }
            if out.len() + 777 <= data.len() {
                assert_eq!(piece.len(), 777);
            }
            out.extend_from_slice(&piece);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn reader_read_all_returns_everything() {
        let data = vec![7u8; 12_345];
        let store = populated_store(&data, 4096);
        let mut reader = serialize_reader(&*store, "db");
        assert_eq!(reader.read(100).unwrap().len(), 100);
        assert_eq!(reader.read_all().unwrap().len(), 12_245);
    }

    #[test]
    fn reader_implements_io_read() {
        let data: Vec<u8> = (0..3000).map(|i| (i % 199) as u8).collect();
        let store = populated_store(&data, 512);
        let mut reader = serialize_reader(&*store, "db");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn deserialize_lays_out_aligned_blocks() {
        let data: Vec<u8> = (0..10_100).map(|i| (i % 251) as u8).collect();
        let store = MemoryBlockStore::new();
        let ingested = deserialize_from(&store, "db", 4096, Cursor::new(&data)).unwrap();
        assert_eq!(ingested, 10_100);

        let entries = store.list("db").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].size, 4096);
        assert_eq!(entries[1].size, 4096);
        assert_eq!(entries[2].size, 1908);
        assert_eq!(collect(&store, "db"), data);
    }

    #[test]
    fn deserialize_of_empty_source_writes_nothing() {
        let store = MemoryBlockStore::new();
        let ingested = deserialize_from(&store, "db", 4096, Cursor::new(&b""[..])).unwrap();
        assert_eq!(ingested, 0);
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn deserialize_exact_multiple_has_no_short_block() {
        let store = MemoryBlockStore::new();
        deserialize_from(&store, "db", 100, Cursor::new(vec![1u8; 300])).unwrap();
        let entries = store.list("db").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.size == 100));
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let data: Vec<u8> = (0..20_000).map(|i| (i % 239) as u8).collect();
        let store = populated_store(&data, 4095);

        let reader = serialize_reader(&*store, "db");
        let other = MemoryBlockStore::new();
        let ingested = deserialize_from(&other, "copy", 4095, reader).unwrap();
        assert_eq!(ingested, data.len() as u64);

        let original = S3VfsFile::new(Arc::clone(&store), "db".into(), 4095);
        let copy = S3VfsFile::new(Arc::new(other), "copy".into(), 4095);
        let size = original.size().unwrap();
        assert_eq!(size, copy.size().unwrap());
        assert_eq!(
            original.read(size as usize, 0).unwrap(),
            copy.read(size as usize, 0).unwrap()
        );
    }
}
