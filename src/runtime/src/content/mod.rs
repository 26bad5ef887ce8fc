//! Content-addressable blob storage.
//!
//! - `BlobStore`: the interface the pull pipeline reads and fills
//! - `LocalBlobStore`: directory-backed implementation

pub mod local;

pub use local::LocalBlobStore;

use async_trait::async_trait;
use imagesource_core::digest::Digest;
use imagesource_core::error::Result;

/// Read/write of opaque blobs by digest.
///
/// Writes of the same digest must be idempotent and safe to race: two pulls
/// sharing a base image may store the same layer concurrently.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether a blob is present.
    async fn exists(&self, digest: &Digest) -> Result<bool>;

    /// Read a blob. Fails with `BlobNotFound` if absent.
    async fn read(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Store a blob. Fails with `DigestMismatch` if `data` does not hash to `digest`.
    async fn write(&self, digest: &Digest, data: &[u8]) -> Result<()>;
}
