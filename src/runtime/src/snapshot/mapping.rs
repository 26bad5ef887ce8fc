//! File-backed chain → blob mapping.
//!
//! Entries live in memory and are persisted to a single JSON file, replaced
//! atomically on every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imagesource_core::digest::Digest;
use imagesource_core::error::{Result, SourceError};
use imagesource_core::identity::ChainId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::BlobMapping;

/// A recorded association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub chain_id: ChainId,
    pub blob: Digest,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingFile {
    entries: Vec<MappingEntry>,
}

/// Blob mapping persisted at a fixed path.
pub struct FileBlobMapping {
    path: PathBuf,
    entries: RwLock<HashMap<ChainId, MappingEntry>>,
}

impl FileBlobMapping {
    /// Open the mapping at `path`, loading existing entries.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = Self::load(path)?;
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "Loaded blob mapping"
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    fn load(path: &Path) -> Result<HashMap<ChainId, MappingEntry>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let data = std::fs::read_to_string(path)?;
        let file: MappingFile = serde_json::from_str(&data).map_err(|e| {
            SourceError::SerializationError(format!(
                "Failed to parse blob mapping {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(file
            .entries
            .into_iter()
            .map(|entry| (entry.chain_id.clone(), entry))
            .collect())
    }

    async fn persist(&self, entries: &HashMap<ChainId, MappingEntry>) -> std::io::Result<()> {
        let mut list: Vec<MappingEntry> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        let data = serde_json::to_vec_pretty(&MappingFile { entries: list })
            .map_err(std::io::Error::other)?;

        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Number of recorded entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All entries, oldest first.
    pub async fn entries(&self) -> Vec<MappingEntry> {
        let mut list: Vec<MappingEntry> = self.entries.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        list
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlobMapping for FileBlobMapping {
    async fn set_blob(&self, chain_id: &ChainId, blob: &Digest) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.get(chain_id).is_some_and(|e| &e.blob == blob) {
            return Ok(());
        }

        let previous = entries.insert(
            chain_id.clone(),
            MappingEntry {
                chain_id: chain_id.clone(),
                blob: blob.clone(),
                recorded_at: Utc::now(),
            },
        );

        // Lock is held across the write so files land in update order.
        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(prev) => entries.insert(chain_id.clone(), prev),
                None => entries.remove(chain_id),
            };
            return Err(SourceError::MappingWriteError {
                chain_id: chain_id.to_string(),
                message: format!("{}: {}", self.path.display(), e),
            });
        }

        tracing::debug!(chain_id = %chain_id, blob = %blob, "Recorded blob mapping");
        Ok(())
    }

    async fn get_blob(&self, chain_id: &ChainId) -> Result<Option<Digest>> {
        Ok(self
            .entries
            .read()
            .await
            .get(chain_id)
            .map(|entry| entry.blob.clone()))
    }
}
