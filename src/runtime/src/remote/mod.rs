//! Reference resolution and blob fetching.

pub mod registry;

pub use registry::{RegistryAuth, RegistryResolver};

use std::sync::Arc;

use async_trait::async_trait;
use imagesource_core::digest::Descriptor;
use imagesource_core::error::Result;

/// Turns a reference string into a root descriptor and a fetcher for its graph.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `reference` to its canonical name and root descriptor.
    async fn resolve(&self, reference: &str) -> Result<(String, Descriptor)>;

    /// Fetcher for blobs reachable from the canonical reference.
    async fn fetcher(&self, canonical: &str) -> Result<Arc<dyn Fetcher>>;
}

/// Downloads the bytes behind a descriptor.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>>;
}
