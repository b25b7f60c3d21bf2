//! S3-compatible implementation of [`BlockStore`].
//!
//! The VFS contract is synchronous, so this adapter owns a current-thread
//! tokio runtime and drives the async SDK to completion inside every call.
//! That makes each operation a blocking network round trip from the caller's
//! perspective, which is exactly what the host engine expects of a VFS.

use std::future::Future;
use std::sync::Arc;

use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use tokio::runtime::Runtime;
use tracing::trace;

use super::{BlockChunks, BlockEntry, BlockStore, StoreError, transport};
use crate::blocks::{block_key, parse_block_index};

// S3 caps DeleteObjects at 1000 keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// [`BlockStore`] backed by an S3-compatible bucket.
///
/// Calls must not be issued from inside an async context: each one blocks on
/// the adapter's own runtime.
pub struct S3BlockStore {
    client: Client,
    bucket: String,
    runtime: Arc<Runtime>,
}

impl S3BlockStore {
    /// Creates a store over `bucket` using the given client and runtime.
    pub fn new(client: Client, bucket: impl Into<String>, runtime: Arc<Runtime>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            runtime,
        }
    }

    /// The bucket this store reads and writes.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{prefix}/"))
            .into_paginator()
            .send();

        while let Some(page) = self.block_on(pages.next()) {
            let page = page.map_err(transport)?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_owned());
                }
            }
        }

        Ok(keys)
    }
}

impl BlockStore for S3BlockStore {
    fn get(&self, prefix: &str, index: u64) -> Result<Option<Bytes>, StoreError> {
        let key = block_key(prefix, index);
        trace!(message = "Fetching block object.", bucket = %self.bucket, key = %key);

        let response = self.block_on(
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send(),
        );

        match response {
            Ok(output) => {
                let payload = self
                    .block_on(output.body.collect())
                    .map_err(transport)?
                    .into_bytes();
                Ok(Some(payload))
            }
            Err(error) if is_no_such_key(&error) => Ok(None),
            Err(error) => Err(transport(error)),
        }
    }

    fn put(&self, prefix: &str, index: u64, payload: Bytes) -> Result<(), StoreError> {
        let key = block_key(prefix, index);
        trace!(
            message = "Storing block object.",
            bucket = %self.bucket,
            key = %key,
            len = payload.len(),
        );

        self.block_on(
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(payload))
                .send(),
        )
        .map_err(transport)?;

        Ok(())
    }

    fn delete(&self, prefix: &str, index: u64) -> Result<(), StoreError> {
        let key = block_key(prefix, index);
        trace!(message = "Deleting block object.", bucket = %self.bucket, key = %key);

        self.block_on(
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send(),
        )
        .map_err(transport)?;

        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        // Deletes every key under the prefix, block-shaped or not, so that a
        // corrupted file can still be removed wholesale.
        let keys = self.list_keys(prefix)?;
        trace!(
            message = "Deleting all objects under prefix.",
            bucket = %self.bucket,
            prefix = %prefix,
            objects = keys.len(),
        );

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(transport)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(transport)?;

            self.block_on(
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send(),
            )
            .map_err(transport)?;
        }

        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlockEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{prefix}/"))
            .into_paginator()
            .send();

        while let Some(page) = self.block_on(pages.next()) {
            let page = page.map_err(transport)?;
            for object in page.contents() {
                let key = object.key().unwrap_or_default();
                let index = parse_block_index(prefix, key).ok_or_else(|| {
                    StoreError::MalformedKey {
                        key: key.to_owned(),
                    }
                })?;
                let size = object.size().unwrap_or_default().max(0) as u64;
                entries.push(BlockEntry { index, size });
            }
        }

        Ok(entries)
    }

    fn has_blocks(&self, prefix: &str) -> Result<bool, StoreError> {
        let output = self.block_on(
            self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(format!("{prefix}/"))
                .max_keys(1)
                .send(),
        )
        .map_err(transport)?;

        Ok(output.key_count().unwrap_or(0) > 0)
    }

    fn chunks(&self, prefix: &str, index: u64) -> Result<BlockChunks<'_>, StoreError> {
        let key = block_key(prefix, index);
        let response = self.block_on(
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send(),
        );

        match response {
            Ok(output) => Ok(Box::new(S3BlockChunkIter {
                runtime: Arc::clone(&self.runtime),
                body: Some(output.body),
            })),
            Err(error) if is_no_such_key(&error) => Ok(Box::new(std::iter::empty())),
            Err(error) => Err(transport(error)),
        }
    }
}

impl std::fmt::Debug for S3BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlockStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

fn is_no_such_key<R>(error: &SdkError<GetObjectError, R>) -> bool {
    error
        .as_service_error()
        .is_some_and(GetObjectError::is_no_such_key)
}

/// Frame-by-frame iterator over one object's payload.
///
/// The body is dropped on the first transport error, which ends the stream.
struct S3BlockChunkIter {
    runtime: Arc<Runtime>,
    body: Option<ByteStream>,
}

impl Iterator for S3BlockChunkIter {
    type Item = Result<Bytes, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let body = self.body.as_mut()?;
        loop {
            match self.runtime.block_on(body.try_next()) {
                Ok(Some(chunk)) if chunk.is_empty() => continue,
                Ok(Some(chunk)) => return Some(Ok(chunk)),
                Ok(None) => {
                    self.body = None;
                    return None;
                }
                Err(error) => {
                    self.body = None;
                    return Some(Err(transport(error)));
                }
            }
        }
    }
}
