//! Content graph dispatch.
//!
//! Walks manifest → config / layers (and index → manifests) with an explicit
//! worklist. Each descriptor is handled once per walk, keyed by digest; the
//! descriptors discovered in one wave are handled concurrently in the next.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use imagesource_core::config::PlatformConfig;
use imagesource_core::digest::{Descriptor, Digest};
use imagesource_core::error::{Result, SourceError};
use tokio_util::sync::CancellationToken;

use super::manifest;
use crate::content::BlobStore;
use crate::remote::Fetcher;

/// One step of the walk: process a descriptor and return its children.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, desc: &Descriptor) -> Result<Vec<Descriptor>>;
}

/// Downloads a blob into the store unless it is already there.
pub struct FetchHandler {
    store: Arc<dyn BlobStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchHandler {
    pub fn new(store: Arc<dyn BlobStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }
}

#[async_trait]
impl Handler for FetchHandler {
    async fn handle(&self, desc: &Descriptor) -> Result<Vec<Descriptor>> {
        if self.store.exists(&desc.digest).await? {
            tracing::debug!(digest = %desc.digest, "Blob already present, skipping fetch");
            return Ok(Vec::new());
        }

        tracing::debug!(
            digest = %desc.digest,
            media_type = %desc.media_type,
            size = desc.size,
            "Fetching blob"
        );

        let data = self.fetcher.fetch(desc).await?;
        if data.len() as u64 != desc.size {
            return Err(SourceError::FetchError {
                digest: desc.digest.to_string(),
                message: format!("expected {} bytes, got {}", desc.size, data.len()),
            });
        }

        self.store
            .write(&desc.digest, &data)
            .await
            .map_err(|e| match e {
                SourceError::DigestMismatch { .. } => SourceError::FetchError {
                    digest: desc.digest.to_string(),
                    message: e.to_string(),
                },
                other => other,
            })?;

        Ok(Vec::new())
    }
}

/// Lists the children of manifests and indexes already in the store.
pub struct ChildrenHandler {
    store: Arc<dyn BlobStore>,
    platform: Option<PlatformConfig>,
}

impl ChildrenHandler {
    /// `platform` filters index entries; `None` follows every entry.
    pub fn new(store: Arc<dyn BlobStore>, platform: Option<PlatformConfig>) -> Self {
        Self { store, platform }
    }
}

#[async_trait]
impl Handler for ChildrenHandler {
    async fn handle(&self, desc: &Descriptor) -> Result<Vec<Descriptor>> {
        if !desc.has_children() {
            return Ok(Vec::new());
        }

        let bytes = self.store.read(&desc.digest).await?;
        manifest::children(desc, &bytes, self.platform.as_ref())
    }
}

/// Runs handlers in order, concatenating the children they return.
pub struct Handlers(Vec<Arc<dyn Handler>>);

impl Handlers {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self(handlers)
    }
}

#[async_trait]
impl Handler for Handlers {
    async fn handle(&self, desc: &Descriptor) -> Result<Vec<Descriptor>> {
        let mut children = Vec::new();
        for handler in &self.0 {
            children.extend(handler.handle(desc).await?);
        }
        Ok(children)
    }
}

/// Walk the graph below `root`, at most `concurrency` handlers in flight.
///
/// The first error aborts the walk; in-flight handlers are dropped.
pub async fn dispatch(
    handler: &dyn Handler,
    root: Descriptor,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut visited: HashSet<Digest> = HashSet::new();
    let mut wave = vec![root];

    while !wave.is_empty() {
        wave.retain(|desc| visited.insert(desc.digest.clone()));
        if wave.is_empty() {
            break;
        }

        let handled = stream::iter(wave)
            .map(|desc| async move { handler.handle(&desc).await })
            .buffer_unordered(concurrency.max(1))
            .try_collect::<Vec<Vec<Descriptor>>>();

        let children = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SourceError::Cancelled("content fetch".to_string()));
            }
            result = handled => result?,
        };

        wave = children.into_iter().flatten().collect();
    }

    Ok(())
}
