//! Image source runtime.
//!
//! Pulls a container image reference into a snapshot chain: resolves the
//! reference, fetches the reachable content graph into a local blob store,
//! pairs manifest layers with config diff ids, applies them as a chain of
//! snapshots and records which blob produced each snapshot.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod content;
pub mod image;
pub mod remote;
pub mod snapshot;
pub mod source;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export common types
pub use cache::{CacheAccessor, ImmutableRef};
pub use content::{BlobStore, LocalBlobStore};
pub use image::{resolve_layers, Layer};
pub use remote::{Fetcher, RegistryAuth, RegistryResolver, Resolver};
pub use snapshot::{BlobMapping, ChainApplier, DiffApplier, FileBlobMapping, Snapshotter};
pub use source::{Identifier, ImageSource, Source, SourceOpt, DOCKER_IMAGE_SCHEME};

/// Image source runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
