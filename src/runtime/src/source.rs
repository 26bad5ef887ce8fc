//! Image source: pulls a reference into the snapshot chain.
//!
//! ```text
//! resolve ──► dispatch (fetch graph) ──► resolve layers ──► apply chain ──► cache ref
//! ```
//!
//! Every stage failure fails the pull. Blobs already in the store and
//! snapshots that already exist are reused, so a repeated pull of the same
//! image does no network or apply work.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use imagesource_core::config::{PlatformConfig, SourceConfig};
use imagesource_core::error::{Result, SourceError};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheAccessor, ImmutableRef};
use crate::content::{BlobStore, LocalBlobStore};
use crate::image::{
    dispatch, resolve_layers, ChildrenHandler, FetchHandler, Handler, Handlers,
};
use crate::remote::{RegistryAuth, RegistryResolver, Resolver};
use crate::snapshot::{BlobMapping, ChainApplier, DiffApplier, Snapshotter};

/// Scheme of container image identifiers.
pub const DOCKER_IMAGE_SCHEME: &str = "docker-image";

/// A source identifier of the form `scheme://reference`.
///
/// A bare reference gets the `docker-image` scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub scheme: String,
    pub reference: String,
}

impl Identifier {
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, reference) = match s.split_once("://") {
            Some((scheme, reference)) => (scheme, reference),
            None => (DOCKER_IMAGE_SCHEME, s),
        };

        if scheme.is_empty() {
            return Err(SourceError::InvalidIdentifier(format!(
                "missing scheme in {:?}",
                s
            )));
        }
        if reference.is_empty() {
            return Err(SourceError::InvalidIdentifier(format!(
                "missing reference in {:?}",
                s
            )));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            reference: reference.to_string(),
        })
    }

    /// Identifier for an image reference.
    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            scheme: DOCKER_IMAGE_SCHEME.to_string(),
            reference: reference.into(),
        }
    }
}

impl FromStr for Identifier {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.reference)
    }
}

/// Something that can materialize identifiers of one scheme.
#[async_trait]
pub trait Source: Send + Sync {
    fn scheme(&self) -> &str;

    async fn pull(
        &self,
        id: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ImmutableRef>>;
}

/// Collaborators and settings for an `ImageSource`.
pub struct SourceOpt {
    pub blob_store: Arc<dyn BlobStore>,
    pub snapshotter: Arc<dyn Snapshotter>,
    pub applier: Arc<dyn DiffApplier>,
    pub cache_accessor: Arc<dyn CacheAccessor>,
    pub resolver: Arc<dyn Resolver>,
    pub platform: PlatformConfig,
    pub max_concurrent_fetches: usize,
}

/// Pulls container images into the snapshot chain.
pub struct ImageSource {
    opt: SourceOpt,
    mapping: Arc<dyn BlobMapping>,
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSource")
            .field("platform", &self.opt.platform)
            .field("max_concurrent_fetches", &self.opt.max_concurrent_fetches)
            .finish_non_exhaustive()
    }
}

impl ImageSource {
    /// Create a source. Fails with `Unsupported` if the snapshotter cannot
    /// record chain → blob mappings.
    pub fn new(opt: SourceOpt) -> Result<Self> {
        let mapping = opt.snapshotter.blob_mapping().ok_or_else(|| {
            SourceError::Unsupported("snapshotter does not support blob mapping".to_string())
        })?;

        Ok(Self { opt, mapping })
    }

    /// Create a source backed by the local content store and a registry
    /// resolver configured from `config`.
    pub fn from_config(
        config: &SourceConfig,
        snapshotter: Arc<dyn Snapshotter>,
        applier: Arc<dyn DiffApplier>,
        cache_accessor: Arc<dyn CacheAccessor>,
    ) -> Result<Self> {
        config.validate()?;

        let blob_store = LocalBlobStore::new(&config.content_dir())?;
        let resolver = RegistryResolver::new(&config.registry, RegistryAuth::from_env());

        Self::new(SourceOpt {
            blob_store: Arc::new(blob_store),
            snapshotter,
            applier,
            cache_accessor,
            resolver: Arc::new(resolver),
            platform: config.platform.clone(),
            max_concurrent_fetches: config.max_concurrent_fetches,
        })
    }

    /// Pull an image reference and return a handle to its top snapshot.
    pub async fn pull_reference(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ImmutableRef>> {
        let started = Instant::now();
        tracing::info!(reference = %reference, "Pulling image");

        let (canonical, root) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SourceError::Cancelled("resolve".to_string()));
            }
            resolved = self.opt.resolver.resolve(reference) => resolved?,
        };
        tracing::debug!(
            reference = %reference,
            canonical = %canonical,
            digest = %root.digest,
            media_type = %root.media_type,
            "Resolved reference"
        );

        let fetcher = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SourceError::Cancelled("resolve".to_string()));
            }
            fetcher = self.opt.resolver.fetcher(&canonical) => fetcher?,
        };
        let fetch: Arc<dyn Handler> =
            Arc::new(FetchHandler::new(self.opt.blob_store.clone(), fetcher));
        let children: Arc<dyn Handler> = Arc::new(ChildrenHandler::new(
            self.opt.blob_store.clone(),
            Some(self.opt.platform.clone()),
        ));
        let handlers = Handlers::new(vec![fetch, children]);
        dispatch(
            &handlers,
            root.clone(),
            self.opt.max_concurrent_fetches,
            cancel,
        )
        .await?;

        let layers = resolve_layers(self.opt.blob_store.as_ref(), &root, &self.opt.platform).await?;
        if layers.is_empty() {
            return Err(SourceError::Unsupported(format!(
                "image {} has no layers",
                canonical
            )));
        }
        tracing::debug!(reference = %canonical, layers = layers.len(), "Resolved layers");

        let chain = ChainApplier::new(
            self.opt.snapshotter.as_ref(),
            self.opt.applier.as_ref(),
            self.mapping.as_ref(),
        );
        let top = chain.apply_layers(&layers, cancel).await?.ok_or_else(|| {
            SourceError::Unsupported(format!("image {} has no layers", canonical))
        })?;

        let image_ref = self.opt.cache_accessor.get(&top).await?;

        tracing::info!(
            reference = %canonical,
            chain_id = %top,
            layers = layers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image pulled"
        );
        Ok(image_ref)
    }
}

#[async_trait]
impl Source for ImageSource {
    fn scheme(&self) -> &str {
        DOCKER_IMAGE_SCHEME
    }

    async fn pull(
        &self,
        id: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ImmutableRef>> {
        if id.scheme != DOCKER_IMAGE_SCHEME {
            return Err(SourceError::InvalidIdentifier(format!(
                "scheme {} is not handled by the image source",
                id.scheme
            )));
        }
        self.pull_reference(&id.reference, cancel).await
    }
}
