//! VFS construction options.

use snafu::Snafu;

/// Default block size in bytes.
///
/// Should be at least as large as any SQLite page size the database will use
/// for best interoperability, but nothing requires the two to divide each
/// other.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BuildError {
    #[snafu(display("parameter '{param_name}' was invalid: {reason}"))]
    InvalidParameter {
        param_name: &'static str,
        reason: String,
    },

    #[snafu(display("failed to create the I/O runtime: {source}"))]
    Runtime { source: std::io::Error },
}

/// Validated VFS configuration.
///
/// Both fields are immutable once the VFS is built; all blocks written under
/// a prefix must share the block size they were first written with.
#[derive(Clone, Debug)]
pub struct S3VfsConfig {
    /// Bucket the block objects live in.
    pub(crate) bucket: String,

    /// Block size in bytes.
    pub(crate) block_size: usize,
}

impl S3VfsConfig {
    /// Starts a configuration for the given bucket.
    pub fn builder(bucket: impl Into<String>) -> S3VfsConfigBuilder {
        S3VfsConfigBuilder {
            bucket: bucket.into(),
            block_size: None,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Builder for [`S3VfsConfig`].
#[derive(Clone, Debug)]
pub struct S3VfsConfigBuilder {
    bucket: String,
    block_size: Option<usize>,
}

impl S3VfsConfigBuilder {
    /// Sets the block size in bytes. Defaults to [`DEFAULT_BLOCK_SIZE`].
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Validates the parameters and produces the configuration.
    pub fn build(self) -> Result<S3VfsConfig, BuildError> {
        if self.bucket.is_empty() {
            return InvalidParameterSnafu {
                param_name: "bucket",
                reason: "bucket name cannot be empty".to_string(),
            }
            .fail();
        }

        let block_size = self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
        if block_size == 0 {
            return InvalidParameterSnafu {
                param_name: "block_size",
                reason: "block size must be at least one byte".to_string(),
            }
            .fail();
        }

        Ok(S3VfsConfig {
            bucket: self.bucket,
            block_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = S3VfsConfig::builder("bucket").build().unwrap();
        assert_eq!(config.bucket(), "bucket");
        assert_eq!(config.block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn explicit_block_size_is_kept() {
        let config = S3VfsConfig::builder("bucket")
            .block_size(65_536)
            .build()
            .unwrap();
        assert_eq!(config.block_size(), 65_536);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let error = S3VfsConfig::builder("bucket")
            .block_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(
            error,
            BuildError::InvalidParameter {
                param_name: "block_size",
                ..
            }
        ));
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let error = S3VfsConfig::builder("").build().unwrap_err();
        assert!(matches!(
            error,
            BuildError::InvalidParameter {
                param_name: "bucket",
                ..
            }
        ));
    }
}
