//! Snapshot chain interfaces and the chain applier.
//!
//! The snapshot manager and diff applier are collaborators; this module only
//! defines what the pull pipeline needs from them.

pub mod apply;
pub mod mapping;

pub use apply::ChainApplier;
pub use mapping::FileBlobMapping;

use std::sync::Arc;

use async_trait::async_trait;
use imagesource_core::digest::Digest;
use imagesource_core::error::Result;
use imagesource_core::identity::ChainId;

use crate::image::Layer;

/// Filesystem states keyed by chain identity.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Whether a committed snapshot exists for `chain_id`.
    async fn exists(&self, chain_id: &ChainId) -> Result<bool>;

    /// Chain → blob mapping capability, if this snapshotter has one.
    fn blob_mapping(&self) -> Option<Arc<dyn BlobMapping>> {
        None
    }
}

/// Materializes a layer on top of a parent snapshot.
#[async_trait]
pub trait DiffApplier: Send + Sync {
    /// Apply `layer` onto `parent` (`None` for the empty chain) and return
    /// the chain identity of the committed snapshot.
    ///
    /// An apply that fails or is dropped must not leave a snapshot visible
    /// through `Snapshotter::exists`.
    async fn apply(&self, parent: Option<&ChainId>, layer: &Layer) -> Result<ChainId>;
}

/// Durable chain identity → blob digest associations.
#[async_trait]
pub trait BlobMapping: Send + Sync {
    /// Record `blob` as the layer blob that produced `chain_id`.
    async fn set_blob(&self, chain_id: &ChainId, blob: &Digest) -> Result<()>;

    /// Blob recorded for `chain_id`, if any.
    async fn get_blob(&self, chain_id: &ChainId) -> Result<Option<Digest>>;
}
