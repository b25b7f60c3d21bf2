#![allow(missing_docs)]
//! Helpers shared by the unit and integration test suites.

use std::sync::Arc;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::config::S3VfsConfig;
use crate::store::s3::S3BlockStore;
use crate::vfs::S3Vfs;

/// A key prefix no other test run will collide with.
pub fn random_prefix() -> String {
    format!("test-{}", Uuid::new_v4().simple())
}

/// Deterministic but non-repeating payload bytes for equality assertions.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Installs the test log subscriber. Safe to call from every test.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_owned())
}

/// Client for the S3-compatible test endpoint, a local MinIO by default.
///
/// Endpoint and credentials are overridable with `S3VFS_TEST_ENDPOINT`,
/// `S3VFS_TEST_ACCESS_KEY`, and `S3VFS_TEST_SECRET_KEY`.
pub fn s3_client() -> Client {
    let credentials = Credentials::new(
        env_or("S3VFS_TEST_ACCESS_KEY", "minioadmin"),
        env_or("S3VFS_TEST_SECRET_KEY", "minioadmin"),
        None,
        None,
        "static",
    );
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .endpoint_url(env_or("S3VFS_TEST_ENDPOINT", "http://localhost:9000"))
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();
    Client::from_conf(config)
}

pub fn blocking_runtime() -> Arc<Runtime> {
    Arc::new(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap(),
    )
}

/// Creates `bucket` if this test run is the first to need it.
pub fn ensure_bucket(client: &Client, runtime: &Runtime, bucket: &str) {
    let result = runtime.block_on(client.create_bucket().bucket(bucket).send());
    match result {
        Ok(_) => {}
        Err(error)
            if error.as_service_error().is_some_and(|e| {
                e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
            }) => {}
        Err(error) => panic!("couldn't create bucket: {error:?}"),
    }
}

/// A block store over `bucket` on the test endpoint, with logging installed.
pub fn s3_block_store(bucket: &str) -> S3BlockStore {
    trace_init();
    let runtime = blocking_runtime();
    let client = s3_client();
    ensure_bucket(&client, &runtime, bucket);
    S3BlockStore::new(client, bucket, runtime)
}

/// A VFS over `bucket` on the test endpoint, with logging installed.
pub fn s3_vfs(bucket: &str, block_size: usize) -> S3Vfs {
    trace_init();
    let client = s3_client();
    ensure_bucket(&client, &blocking_runtime(), bucket);
    let config = S3VfsConfig::builder(bucket)
        .block_size(block_size)
        .build()
        .unwrap();
    S3Vfs::new(client, config).unwrap()
}
