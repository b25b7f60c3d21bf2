//! In-memory implementation of [`BlockStore`] for tests.
//!
//! A `BTreeMap` keyed by full object key keeps entries in lexicographic
//! order, which matches the ascending-index enumeration contract of the real
//! store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::Bytes;

use super::{BlockChunks, BlockEntry, BlockStore, StoreError};
use crate::blocks::{block_key, parse_block_index};

// Payloads stream in bounded frames so consumers exercise their re-chunking
// paths the same way they would against a network body.
const CHUNK_SIZE: usize = 1024;

/// [`BlockStore`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored, across all prefixes.
    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("store lock poisoned").len()
    }

    fn key_range(prefix: &str) -> (String, String) {
        // '0' is the byte after '/', so the half-open range covers exactly
        // the keys under "<prefix>/".
        (format!("{prefix}/"), format!("{prefix}0"))
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, prefix: &str, index: u64) -> Result<Option<Bytes>, StoreError> {
        let objects = self.objects.lock().expect("store lock poisoned");
        Ok(objects.get(&block_key(prefix, index)).cloned())
    }

    fn put(&self, prefix: &str, index: u64, payload: Bytes) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().expect("store lock poisoned");
        objects.insert(block_key(prefix, index), payload);
        Ok(())
    }

    fn delete(&self, prefix: &str, index: u64) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().expect("store lock poisoned");
        objects.remove(&block_key(prefix, index));
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let (from, to) = Self::key_range(prefix);
        let mut objects = self.objects.lock().expect("store lock poisoned");
        let doomed: Vec<_> = objects.range(from..to).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            objects.remove(&key);
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlockEntry>, StoreError> {
        let (from, to) = Self::key_range(prefix);
        let objects = self.objects.lock().expect("store lock poisoned");
        objects
            .range(from..to)
            .map(|(key, payload)| {
                let index =
                    parse_block_index(prefix, key).ok_or_else(|| StoreError::MalformedKey {
                        key: key.clone(),
                    })?;
                Ok(BlockEntry {
                    index,
                    size: payload.len() as u64,
                })
            })
            .collect()
    }

    fn chunks(&self, prefix: &str, index: u64) -> Result<BlockChunks<'_>, StoreError> {
        let payload = self.get(prefix, index)?.unwrap_or_default();
        let chunks: Vec<_> = (0..payload.len())
            .step_by(CHUNK_SIZE)
            .map(|at| Ok(payload.slice(at..payload.len().min(at + CHUNK_SIZE))))
            .collect();
        Ok(Box::new(chunks.into_iter()))
    }
}
