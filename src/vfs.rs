//! The VFS-level half of the contract: open, delete, access checks, path
//! resolution, and the import/export entry points.

use std::io::Read;
use std::sync::Arc;

use snafu::ResultExt;
use tracing::debug;
use uuid::Uuid;

use crate::config::{BuildError, RuntimeSnafu, S3VfsConfig};
use crate::error::{StoreSnafu, VfsError};
use crate::file::S3VfsFile;
use crate::serialize::{self, SerializeIter, SerializeReader};
use crate::store::BlockStore;
use crate::store::s3::S3BlockStore;

/// The kind of access being probed through [`S3Vfs::access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Does the file exist?
    Exists,
    /// Can the file be read?
    Read,
    /// Can the file be read and written?
    ReadWrite,
}

/// A virtual filesystem whose files live as block objects in an object
/// store.
///
/// Each instance carries a process-unique name so several can coexist and
/// the host engine can select one by name at connection open. The instance
/// must outlive every connection that references it; handles share the
/// store by `Arc`, so dropping the VFS while files are open is safe from
/// this crate's perspective and the constraint is the host's registry.
pub struct S3Vfs<S = S3BlockStore> {
    name: String,
    block_size: usize,
    store: Arc<S>,
}

impl S3Vfs<S3BlockStore> {
    /// Builds a VFS over an S3 bucket from a validated configuration.
    ///
    /// Creates the I/O runtime the store blocks on; the bucket reference and
    /// block size are immutable from here on.
    pub fn new(client: aws_sdk_s3::Client, config: S3VfsConfig) -> Result<Self, BuildError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context(RuntimeSnafu)?;
        let store = S3BlockStore::new(client, config.bucket, Arc::new(runtime));
        Ok(Self::with_store(store, config.block_size))
    }
}

impl<S: BlockStore> S3Vfs<S> {
    /// Builds a VFS over an arbitrary block store.
    pub fn with_store(store: S, block_size: usize) -> Self {
        let name = format!("s3vfs-{}", Uuid::new_v4());
        debug!(message = "Created VFS instance.", name = %name, block_size);
        Self {
            name,
            block_size,
            store: Arc::new(store),
        }
    }

    /// The process-unique name the host engine selects this VFS by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The block size every file opened through this VFS is sharded with.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Answers the host engine's access probe for `path`.
    ///
    /// Existence means at least one object under the prefix. Read and
    /// read-write probes are answered permissively; the engine treats them
    /// as hints and ACL enforcement belongs to the store.
    pub fn access(&self, path: &str, kind: AccessKind) -> Result<bool, VfsError> {
        match kind {
            AccessKind::Exists => self.store.has_blocks(path).context(StoreSnafu),
            AccessKind::Read | AccessKind::ReadWrite => Ok(true),
        }
    }

    /// Path resolution is the identity: the filename is the key prefix.
    pub fn full_pathname<'n>(&self, filename: &'n str) -> &'n str {
        filename
    }

    /// Deletes every object under `filename/`.
    pub fn delete(&self, filename: &str, _sync_dir: bool) -> Result<(), VfsError> {
        debug!(message = "Deleting file.", prefix = %filename);
        self.store.delete_prefix(filename).context(StoreSnafu)
    }

    /// Opens `name` as a file handle.
    ///
    /// URI-style filenames are reduced to their path component; anything
    /// else is used verbatim as the key prefix. The file itself comes into
    /// existence on first write.
    pub fn open(&self, name: &str) -> S3VfsFile<S> {
        let key_prefix = uri_path(name);
        debug!(message = "Opening file.", prefix = %key_prefix);
        S3VfsFile::new(
            Arc::clone(&self.store),
            key_prefix.to_owned(),
            self.block_size,
        )
    }

    /// Streams the file at `key_prefix` as a contiguous database image. See
    /// [`serialize::serialize_iter`].
    pub fn serialize_iter(&self, key_prefix: &str) -> SerializeIter<'_, S> {
        serialize::serialize_iter(&*self.store, key_prefix)
    }

    /// Pull-style variant of [`Self::serialize_iter`]. See
    /// [`serialize::serialize_reader`].
    pub fn serialize_reader(&self, key_prefix: &str) -> SerializeReader<'_, S> {
        serialize::serialize_reader(&*self.store, key_prefix)
    }

    /// Ingests a contiguous database image under `key_prefix`. See
    /// [`serialize::deserialize_from`].
    pub fn deserialize_from<R: Read>(&self, key_prefix: &str, source: R) -> Result<u64, VfsError> {
        serialize::deserialize_from(&*self.store, key_prefix, self.block_size, source)
    }
}

impl<S> std::fmt::Debug for S3Vfs<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Vfs")
            .field("name", &self.name)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

/// Extracts the path component of a `file:` URI, or returns the name
/// unchanged when it is not a URI.
fn uri_path(name: &str) -> &str {
    let Some(rest) = name.strip_prefix("file:") else {
        return name;
    };
    let rest = match rest.find(['?', '#']) {
        Some(at) => &rest[..at],
        None => rest,
    };
    match rest.strip_prefix("//") {
        // Authority (usually empty or "localhost") ends at the next slash.
        Some(after_authority) => match after_authority.find('/') {
            Some(at) => &after_authority[at..],
            None => "",
        },
        None => rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBlockStore;

    fn vfs() -> S3Vfs<MemoryBlockStore> {
        S3Vfs::with_store(MemoryBlockStore::new(), 4096)
    }

    #[test]
    fn names_are_unique_per_instance() {
        let a = vfs();
        let b = vfs();
        assert!(a.name().starts_with("s3vfs-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn uri_names_reduce_to_their_path() {
        assert_eq!(uri_path("a-test/cool.db"), "a-test/cool.db");
        assert_eq!(uri_path("file:a-test/cool.db"), "a-test/cool.db");
        assert_eq!(uri_path("file:a-test/cool.db?vfs=s3vfs&mode=rw"), "a-test/cool.db");
        assert_eq!(uri_path("file:///tmp/cool.db"), "/tmp/cool.db");
        assert_eq!(uri_path("file://localhost/tmp/cool.db"), "/tmp/cool.db");
    }

    #[test]
    fn full_pathname_is_identity() {
        let vfs = vfs();
        assert_eq!(vfs.full_pathname("x/y.db"), "x/y.db");
    }

    #[test]
    fn access_exists_follows_contents() {
        let vfs = vfs();
        assert!(!vfs.access("db", AccessKind::Exists).unwrap());

        let file = vfs.open("db");
        file.write(b"hello", 0).unwrap();
        assert!(vfs.access("db", AccessKind::Exists).unwrap());

        // Permissive by design; the store enforces ACLs.
        assert!(vfs.access("db", AccessKind::Read).unwrap());
        assert!(vfs.access("missing", AccessKind::ReadWrite).unwrap());
    }

    #[test]
    fn delete_removes_the_whole_file() {
        let vfs = vfs();
        let file = vfs.open("db");
        file.write(&[1; 10_000], 0).unwrap();
        vfs.delete("db", false).unwrap();
        assert!(!vfs.access("db", AccessKind::Exists).unwrap());
        assert_eq!(file.size().unwrap(), 0);
    }

    #[test]
    fn open_strips_uri_decoration() {
        let vfs = vfs();
        let file = vfs.open("file:db?vfs=whatever");
        assert_eq!(file.key_prefix(), "db");
    }

    #[test]
    fn handles_share_one_store() {
        let vfs = vfs();
        let writer = vfs.open("db");
        let reader = vfs.open("db");
        writer.write(b"shared", 0).unwrap();
        assert_eq!(&reader.read(6, 0).unwrap()[..], b"shared");
    }

    #[test]
    fn serialize_entry_points_delegate() {
        let vfs = vfs();
        let file = vfs.open("db");
        file.write(&[9; 5000], 0).unwrap();

        let total: usize = vfs
            .serialize_iter("db")
            .map(|chunk| chunk.unwrap().len())
            .sum();
        assert_eq!(total as u64, file.size().unwrap());

        let reader = vfs.serialize_reader("db");
        let ingested = vfs.deserialize_from("copy", reader).unwrap();
        assert_eq!(ingested, 5000);
        assert_eq!(vfs.open("copy").read(5000, 0).unwrap(), file.read(5000, 0).unwrap());
    }
}
