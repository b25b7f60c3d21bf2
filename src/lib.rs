//! A SQLite virtual filesystem backed by S3-compatible object storage.
//!
//! A logical database file is stored not as one opaque object but as a
//! sequence of fixed-size blocks, each its own object under a common key
//! prefix (`<prefix>/<NNNNNNNNNN>`, ten-digit zero-padded block index).
//! Reads and writes issued by the database engine are translated into
//! block-granular gets and puts, so SQLite can run directly against a
//! bucket with no intermediate local filesystem.
//!
//! The crate provides the VFS-shaped surface ([`S3Vfs`], [`S3VfsFile`]),
//! the block store seam ([`BlockStore`] with the production
//! [`S3BlockStore`]), and import/export between the sharded layout and an
//! ordinary single-file database image ([`serialize`]). Registering the VFS
//! with the host engine is left to the embedding application.
//!
//! ```no_run
//! use aws_sdk_s3::config::{BehaviorVersion, Region};
//! use s3vfs::{S3Vfs, S3VfsConfig};
//!
//! let client = aws_sdk_s3::Client::from_conf(
//!     aws_sdk_s3::Config::builder()
//!         .behavior_version(BehaviorVersion::latest())
//!         .region(Region::new("us-east-1"))
//!         .build(),
//! );
//! let config = S3VfsConfig::builder("my-bucket").block_size(65_536).build()?;
//! let vfs = S3Vfs::new(client, config)?;
//!
//! let db = vfs.open("a-test/cool.db");
//! db.write(b"hello", 0)?;
//! assert_eq!(&db.read(5, 0)?[..], b"hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Every store operation is a synchronous, blocking network call from the
//! caller's perspective; do not drive the VFS from inside an async context.
//! Multi-writer coordination is out of scope: the design assumes the host
//! enforces single-writer exclusion at a higher level.

mod blocks;
pub mod config;
pub mod error;
pub mod file;
pub mod serialize;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;
pub mod vfs;

pub use self::config::{DEFAULT_BLOCK_SIZE, S3VfsConfig, S3VfsConfigBuilder};
pub use self::error::VfsError;
pub use self::file::{LOCK_PAGE_OFFSET, LockLevel, MAX_DATABASE_SIZE, S3VfsFile, SyncFlags};
pub use self::store::s3::S3BlockStore;
pub use self::store::{BlockEntry, BlockStore, StoreError};
pub use self::vfs::{AccessKind, S3Vfs};
