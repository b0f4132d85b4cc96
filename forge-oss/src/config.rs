use crate::retry::RetryPolicy;
use crate::Result;
use snafu::ensure;

/// The smallest part size the storage backend accepts for any part but the last
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// The configuration settings that control the behavior of uploads.
///
/// This is an immutable value handed to each [`crate::UploadJobBuilder`]; there are no
/// process-wide upload defaults.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// The size of each part of a multi-part upload.
    ///
    /// Every part except the last one is exactly this size.  Can be specified as an integer, ie
    /// "10000000", or with a suffix ie "100MiB".  The storage service rejects parts smaller than
    /// 5MiB (except for the last part).
    #[cfg_attr(feature = "clap", clap(long, default_value = "100MiB", global = true))]
    pub chunk_size: byte_unit::Byte,

    /// How long the signed upload URLs remain valid, in minutes.
    ///
    /// Must be between 1 and 60.
    #[cfg_attr(feature = "clap", clap(long, default_value = "60", global = true))]
    pub minutes_expiration: u32,

    /// The smallest allowed chunk size.
    ///
    /// This is the storage service's limit and there's normally no reason to change it, except
    /// when talking to a test double.
    #[cfg_attr(feature = "clap", clap(skip = byte_unit::Byte::from_bytes(MIN_CHUNK_SIZE as u128)))]
    pub min_chunk_size: byte_unit::Byte,

    /// Retry policy for the signed URL and finalize requests to the storage gateway
    #[cfg_attr(feature = "clap", clap(skip = RetryPolicy::storage_gateway()))]
    pub gateway_retry: RetryPolicy,

    /// Retry policy for the PUT of each part to its signed URL
    #[cfg_attr(feature = "clap", clap(skip = RetryPolicy::signed_url_put()))]
    pub part_upload_retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        // XXX: Unfortunately this is duplicated here and in the `clap` attributes, unfortunately I
        // can't find a better way unless we unconditionally take a clap dependency in the lib
        // crate which I'm not willing to do
        Self {
            chunk_size: byte_unit::Byte::from_bytes(100 * 1024 * 1024),
            minutes_expiration: 60,
            min_chunk_size: byte_unit::Byte::from_bytes(MIN_CHUNK_SIZE as u128),
            gateway_retry: RetryPolicy::storage_gateway(),
            part_upload_retry: RetryPolicy::signed_url_put(),
        }
    }
}

impl Config {
    /// The chunk size in bytes
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size.get_bytes() as u64
    }

    /// Check that the settings are within the limits the storage service imposes
    pub fn validate(&self) -> Result<()> {
        let chunk_size = self.chunk_size_bytes();
        let min_chunk_size = self.min_chunk_size.get_bytes() as u64;

        ensure!(
            chunk_size > 0 && chunk_size >= min_chunk_size,
            crate::error::InvalidConfigSnafu {
                message: format!(
                    "the chunk size {chunk_size} is smaller than the minimum of {min_chunk_size} bytes"
                ),
            }
        );

        // Parts are buffered in memory one at a time
        ensure!(
            usize::try_from(chunk_size).is_ok(),
            crate::error::InvalidConfigSnafu {
                message: format!("the chunk size {chunk_size} is too large for this platform"),
            }
        );

        ensure!(
            (1..=60).contains(&self.minutes_expiration),
            crate::error::InvalidConfigSnafu {
                message: format!(
                    "the signed URL expiration must be between 1 and 60 minutes, not {}",
                    self.minutes_expiration
                ),
            }
        );

        self.gateway_retry.validate("storage gateway")?;
        self.part_upload_retry.validate("part upload")?;

        Ok(())
    }
}
