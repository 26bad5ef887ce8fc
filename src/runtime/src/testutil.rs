//! In-memory collaborators and JSON builders shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use imagesource_core::digest::{
    Descriptor, Digest, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER, MEDIA_TYPE_OCI_LAYER_GZIP,
    MEDIA_TYPE_OCI_MANIFEST,
};
use imagesource_core::error::{Result, SourceError};
use imagesource_core::identity::ChainId;
use parking_lot::Mutex;
use serde_json::json;

use crate::image::Layer;
use crate::remote::Fetcher;
use crate::snapshot::{BlobMapping, DiffApplier, Snapshotter};

fn descriptor_json(desc: &Descriptor) -> serde_json::Value {
    json!({
        "mediaType": desc.media_type,
        "digest": desc.digest.as_str(),
        "size": desc.size,
    })
}

pub(crate) fn manifest_json(config: &Descriptor, layers: &[Descriptor]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_MANIFEST,
        "config": descriptor_json(config),
        "layers": layers.iter().map(descriptor_json).collect::<Vec<_>>(),
    }))
    .unwrap()
}

pub(crate) fn config_json(diff_ids: &[Digest]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "architecture": "amd64",
        "os": "linux",
        "config": {},
        "rootfs": {
            "type": "layers",
            "diff_ids": diff_ids.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
        },
        "history": [],
    }))
    .unwrap()
}

pub(crate) fn index_json(manifests: &[(&Descriptor, &str, &str)]) -> Vec<u8> {
    let entries: Vec<_> = manifests
        .iter()
        .map(|(desc, os, arch)| {
            let mut entry = descriptor_json(desc);
            entry["platform"] = json!({ "os": os, "architecture": arch });
            entry
        })
        .collect();
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_INDEX,
        "manifests": entries,
    }))
    .unwrap()
}

/// A layer whose diff and blob are derived from `n`.
pub(crate) fn layer(n: u8) -> Layer {
    let blob = format!("blob{}", n);
    Layer {
        diff: Descriptor::new(
            MEDIA_TYPE_OCI_LAYER,
            Digest::sha256(format!("diff{}", n).as_bytes()),
            0,
        ),
        blob: Descriptor::for_bytes(MEDIA_TYPE_OCI_LAYER_GZIP, blob.as_bytes()),
    }
}

#[derive(Default)]
struct FetcherState {
    bodies: HashMap<Digest, Vec<u8>>,
    missing: HashSet<Digest>,
    tampered: HashMap<Digest, Vec<u8>>,
    fetched: Vec<Digest>,
}

/// Serves registered bodies and records every fetch.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    state: Mutex<FetcherState>,
}

impl FakeFetcher {
    pub fn add(&self, media_type: &str, body: &[u8]) -> Descriptor {
        let desc = Descriptor::for_bytes(media_type, body);
        self.state
            .lock()
            .bodies
            .insert(desc.digest.clone(), body.to_vec());
        desc
    }

    pub fn body(&self, digest: &Digest) -> Vec<u8> {
        self.state.lock().bodies[digest].clone()
    }

    /// Fetches of `digest` fail from now on.
    pub fn remove(&self, digest: &Digest) {
        self.state.lock().missing.insert(digest.clone());
    }

    /// Fetches of `digest` return `body` instead of the registered bytes.
    pub fn tamper(&self, digest: &Digest, body: &[u8]) {
        self.state
            .lock()
            .tampered
            .insert(digest.clone(), body.to_vec());
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetched.len()
    }

    pub fn fetches_of(&self, digest: &Digest) -> usize {
        self.state
            .lock()
            .fetched
            .iter()
            .filter(|d| *d == digest)
            .count()
    }

    pub fn fetched(&self) -> Vec<Digest> {
        self.state.lock().fetched.clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.fetched.push(desc.digest.clone());

        if state.missing.contains(&desc.digest) {
            return Err(SourceError::FetchError {
                digest: desc.digest.to_string(),
                message: "not found".to_string(),
            });
        }
        if let Some(body) = state.tampered.get(&desc.digest) {
            return Ok(body.clone());
        }
        state
            .bodies
            .get(&desc.digest)
            .cloned()
            .ok_or_else(|| SourceError::FetchError {
                digest: desc.digest.to_string(),
                message: "unknown blob".to_string(),
            })
    }
}

/// Set of committed chain identities.
#[derive(Default)]
pub(crate) struct FakeSnapshots {
    committed: Mutex<HashSet<ChainId>>,
}

impl FakeSnapshots {
    pub fn insert(&self, chain_id: ChainId) {
        self.committed.lock().insert(chain_id);
    }
}

#[async_trait]
impl Snapshotter for FakeSnapshots {
    async fn exists(&self, chain_id: &ChainId) -> Result<bool> {
        Ok(self.committed.lock().contains(chain_id))
    }
}

/// Commits the computed chain into `FakeSnapshots`.
pub(crate) struct FakeApplier {
    snapshots: Arc<FakeSnapshots>,
    applied: Mutex<Vec<ChainId>>,
    fail_on: Mutex<Option<Digest>>,
    misreport: Mutex<bool>,
}

impl FakeApplier {
    pub fn new(snapshots: Arc<FakeSnapshots>) -> Self {
        Self {
            snapshots,
            applied: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            misreport: Mutex::new(false),
        }
    }

    pub fn applied(&self) -> Vec<ChainId> {
        self.applied.lock().clone()
    }

    /// Applying the layer with this diff fails without committing.
    pub fn fail_on(&self, diff: &Digest) {
        *self.fail_on.lock() = Some(diff.clone());
    }

    /// Report a chain identity other than the one committed.
    pub fn misreport(&self) {
        *self.misreport.lock() = true;
    }
}

#[async_trait]
impl DiffApplier for FakeApplier {
    async fn apply(&self, parent: Option<&ChainId>, layer: &Layer) -> Result<ChainId> {
        if self.fail_on.lock().as_ref() == Some(&layer.diff.digest) {
            return Err(SourceError::ApplyError {
                digest: layer.diff.digest.to_string(),
                message: "apply failed".to_string(),
            });
        }

        let chain_id = ChainId::extend(parent, &layer.diff.digest);
        self.snapshots.insert(chain_id.clone());
        self.applied.lock().push(chain_id.clone());

        if *self.misreport.lock() {
            return Ok(ChainId::extend(Some(&chain_id), &layer.diff.digest));
        }
        Ok(chain_id)
    }
}

#[derive(Default)]
pub(crate) struct MemoryBlobMapping {
    entries: Mutex<HashMap<ChainId, Digest>>,
    fail_writes: Mutex<bool>,
    fail_reads: Mutex<bool>,
}

impl MemoryBlobMapping {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn fail_writes(&self) {
        *self.fail_writes.lock() = true;
    }

    pub fn fail_reads(&self) {
        *self.fail_reads.lock() = true;
    }
}

#[async_trait]
impl BlobMapping for MemoryBlobMapping {
    async fn set_blob(&self, chain_id: &ChainId, blob: &Digest) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(SourceError::MappingWriteError {
                chain_id: chain_id.to_string(),
                message: "read-only".to_string(),
            });
        }
        self.entries.lock().insert(chain_id.clone(), blob.clone());
        Ok(())
    }

    async fn get_blob(&self, chain_id: &ChainId) -> Result<Option<Digest>> {
        if *self.fail_reads.lock() {
            return Err(SourceError::Other("mapping unavailable".to_string()));
        }
        Ok(self.entries.lock().get(chain_id).cloned())
    }
}
