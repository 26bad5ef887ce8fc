//! In-memory registry, snapshotter, applier and cache used by the pull tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use imagesource_core::config::PlatformConfig;
use imagesource_core::digest::{
    Descriptor, Digest, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER_GZIP,
    MEDIA_TYPE_OCI_MANIFEST,
};
use imagesource_core::error::{Result, SourceError};
use imagesource_core::identity::ChainId;
use imagesource_runtime::{
    BlobMapping, CacheAccessor, DiffApplier, Fetcher, FileBlobMapping, ImageSource,
    ImmutableRef, Layer, LocalBlobStore, Resolver, Snapshotter, SourceOpt,
};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

pub fn amd64() -> PlatformConfig {
    PlatformConfig {
        os: "linux".to_string(),
        architecture: "amd64".to_string(),
        variant: None,
    }
}

pub fn diff(name: &str) -> Digest {
    Digest::sha256(format!("uncompressed {}", name).as_bytes())
}

fn descriptor_json(desc: &Descriptor) -> serde_json::Value {
    json!({
        "mediaType": desc.media_type,
        "digest": desc.digest.as_str(),
        "size": desc.size,
    })
}

/// Descriptors of an image pushed to the fake registry.
#[derive(Debug, Clone)]
pub struct Image {
    pub manifest: Descriptor,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    pub diffs: Vec<Digest>,
}

#[derive(Default)]
struct RegistryState {
    tags: HashMap<String, Descriptor>,
    blobs: HashMap<Digest, Vec<u8>>,
    missing: HashSet<Digest>,
    tampered: HashMap<Digest, Vec<u8>>,
    hanging: HashSet<Digest>,
    resolve_hangs: bool,
    fetched: Vec<Digest>,
}

/// Tag → root descriptor plus blob bodies, with fetch accounting.
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    pub fn put(&self, media_type: &str, body: &[u8]) -> Descriptor {
        let desc = Descriptor::for_bytes(media_type, body);
        self.state
            .lock()
            .blobs
            .insert(desc.digest.clone(), body.to_vec());
        desc
    }

    /// Store a manifest with `layers` as blob bodies and `diffs` as config
    /// diff ids. The counts may differ to model a corrupt image.
    pub fn image(&self, layers: &[&[u8]], diffs: &[Digest], arch: &str) -> Image {
        let layer_descs: Vec<Descriptor> = layers
            .iter()
            .map(|body| self.put(MEDIA_TYPE_OCI_LAYER_GZIP, body))
            .collect();

        let config_body = serde_json::to_vec(&json!({
            "architecture": arch,
            "os": "linux",
            "config": {},
            "rootfs": {
                "type": "layers",
                "diff_ids": diffs.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
            },
            "history": [],
        }))
        .unwrap();
        let config = self.put(MEDIA_TYPE_OCI_CONFIG, &config_body);

        let manifest_body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": descriptor_json(&config),
            "layers": layer_descs.iter().map(descriptor_json).collect::<Vec<_>>(),
        }))
        .unwrap();
        let manifest = self.put(MEDIA_TYPE_OCI_MANIFEST, &manifest_body);

        Image {
            manifest,
            config,
            layers: layer_descs,
            diffs: diffs.to_vec(),
        }
    }

    /// Store an index over `(manifest, architecture)` pairs.
    pub fn index(&self, manifests: &[(&Descriptor, &str)]) -> Descriptor {
        let entries: Vec<_> = manifests
            .iter()
            .map(|(desc, arch)| {
                let mut entry = descriptor_json(desc);
                entry["platform"] = json!({ "os": "linux", "architecture": arch });
                entry
            })
            .collect();
        let body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": entries,
        }))
        .unwrap();
        self.put(MEDIA_TYPE_OCI_INDEX, &body)
    }

    pub fn tag(&self, reference: &str, root: &Descriptor) {
        self.state
            .lock()
            .tags
            .insert(reference.to_string(), root.clone());
    }

    pub fn body(&self, digest: &Digest) -> Vec<u8> {
        self.state.lock().blobs[digest].clone()
    }

    pub fn remove(&self, digest: &Digest) {
        self.state.lock().missing.insert(digest.clone());
    }

    pub fn tamper(&self, digest: &Digest, body: &[u8]) {
        self.state
            .lock()
            .tampered
            .insert(digest.clone(), body.to_vec());
    }

    /// Fetches of `digest` never complete.
    pub fn hang(&self, digest: &Digest) {
        self.state.lock().hanging.insert(digest.clone());
    }

    /// Resolves never complete.
    pub fn hang_resolve(&self) {
        self.state.lock().resolve_hangs = true;
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetched.len()
    }

    pub fn fetched(&self) -> Vec<Digest> {
        self.state.lock().fetched.clone()
    }
}

#[async_trait]
impl Resolver for Registry {
    async fn resolve(&self, reference: &str) -> Result<(String, Descriptor)> {
        let (root, hang) = {
            let state = self.state.lock();
            (state.tags.get(reference).cloned(), state.resolve_hangs)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        match root {
            Some(desc) => Ok((reference.to_string(), desc)),
            None => Err(SourceError::ResolveError {
                reference: reference.to_string(),
                message: "manifest unknown".to_string(),
            }),
        }
    }

    async fn fetcher(&self, _canonical: &str) -> Result<Arc<dyn Fetcher>> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Fetcher for Registry {
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let hang = {
            let mut state = self.state.lock();
            state.fetched.push(desc.digest.clone());
            state.hanging.contains(&desc.digest)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let state = self.state.lock();
        if state.missing.contains(&desc.digest) {
            return Err(SourceError::FetchError {
                digest: desc.digest.to_string(),
                message: "blob unknown".to_string(),
            });
        }
        if let Some(body) = state.tampered.get(&desc.digest) {
            return Ok(body.clone());
        }
        state
            .blobs
            .get(&desc.digest)
            .cloned()
            .ok_or_else(|| SourceError::FetchError {
                digest: desc.digest.to_string(),
                message: "blob unknown".to_string(),
            })
    }
}

/// Committed chain identities, optionally with a mapping capability.
pub struct Snapshots {
    committed: Mutex<HashSet<ChainId>>,
    mapping: Option<Arc<FileBlobMapping>>,
}

impl Snapshots {
    pub fn new(mapping: Option<Arc<FileBlobMapping>>) -> Self {
        Self {
            committed: Mutex::new(HashSet::new()),
            mapping,
        }
    }

    pub fn commit(&self, chain_id: ChainId) {
        self.committed.lock().insert(chain_id);
    }

    pub fn contains(&self, chain_id: &ChainId) -> bool {
        self.committed.lock().contains(chain_id)
    }

    pub fn len(&self) -> usize {
        self.committed.lock().len()
    }
}

#[async_trait]
impl Snapshotter for Snapshots {
    async fn exists(&self, chain_id: &ChainId) -> Result<bool> {
        Ok(self.contains(chain_id))
    }

    fn blob_mapping(&self) -> Option<Arc<dyn BlobMapping>> {
        self.mapping
            .clone()
            .map(|mapping| mapping as Arc<dyn BlobMapping>)
    }
}

/// Commits `extend(parent, diff)` for each applied layer.
pub struct Applier {
    snapshots: Arc<Snapshots>,
    applied: Mutex<Vec<Layer>>,
    fail_on: Mutex<Option<Digest>>,
}

impl Applier {
    pub fn new(snapshots: Arc<Snapshots>) -> Self {
        Self {
            snapshots,
            applied: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, diff: &Digest) {
        *self.fail_on.lock() = Some(diff.clone());
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().len()
    }

    pub fn applied(&self) -> Vec<Layer> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl DiffApplier for Applier {
    async fn apply(&self, parent: Option<&ChainId>, layer: &Layer) -> Result<ChainId> {
        if self.fail_on.lock().as_ref() == Some(&layer.diff.digest) {
            return Err(SourceError::ApplyError {
                digest: layer.diff.digest.to_string(),
                message: "unpack failed".to_string(),
            });
        }

        let chain_id = ChainId::extend(parent, &layer.diff.digest);
        self.snapshots.commit(chain_id.clone());
        self.applied.lock().push(layer.clone());
        Ok(chain_id)
    }
}

#[derive(Debug)]
pub struct SnapshotRef {
    chain_id: ChainId,
}

impl ImmutableRef for SnapshotRef {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }
}

/// Hands out references to committed snapshots only.
pub struct Cache {
    snapshots: Arc<Snapshots>,
}

#[async_trait]
impl CacheAccessor for Cache {
    async fn get(&self, chain_id: &ChainId) -> Result<Arc<dyn ImmutableRef>> {
        if !self.snapshots.contains(chain_id) {
            return Err(SourceError::Other(format!("no snapshot for {}", chain_id)));
        }
        Ok(Arc::new(SnapshotRef {
            chain_id: chain_id.clone(),
        }))
    }
}

/// A source wired to in-memory collaborators over a temporary root.
pub struct Harness {
    pub tmp: TempDir,
    pub registry: Registry,
    pub store: Arc<LocalBlobStore>,
    pub snapshots: Arc<Snapshots>,
    pub applier: Arc<Applier>,
    pub mapping: Arc<FileBlobMapping>,
    pub source: ImageSource,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::default();
        let store = Arc::new(LocalBlobStore::new(&tmp.path().join("content")).unwrap());
        let mapping = Arc::new(FileBlobMapping::new(&tmp.path().join("blobmap.json")).unwrap());
        let snapshots = Arc::new(Snapshots::new(Some(mapping.clone())));
        let applier = Arc::new(Applier::new(snapshots.clone()));

        let source = ImageSource::new(opt(&registry, &store, &snapshots, &applier)).unwrap();

        Self {
            tmp,
            registry,
            store,
            snapshots,
            applier,
            mapping,
            source,
        }
    }
}

pub fn opt(
    registry: &Registry,
    store: &Arc<LocalBlobStore>,
    snapshots: &Arc<Snapshots>,
    applier: &Arc<Applier>,
) -> SourceOpt {
    SourceOpt {
        blob_store: store.clone(),
        snapshotter: snapshots.clone(),
        applier: applier.clone(),
        cache_accessor: Arc::new(Cache {
            snapshots: snapshots.clone(),
        }),
        resolver: Arc::new(registry.clone()),
        platform: amd64(),
        max_concurrent_fetches: 4,
    }
}

pub fn cache(snapshots: &Arc<Snapshots>) -> Arc<dyn CacheAccessor> {
    Arc::new(Cache {
        snapshots: snapshots.clone(),
    })
}
