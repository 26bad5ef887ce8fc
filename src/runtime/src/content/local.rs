//! Directory-backed content store.
//!
//! Blobs live at `<root>/blobs/<algorithm>/<hex>`. Writes go to a unique file
//! under `<root>/ingest/` first and are renamed into place once the digest has
//! been verified, so a reader never observes a partial blob and an aborted
//! write leaves nothing under `blobs/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imagesource_core::digest::Digest;
use imagesource_core::error::{Result, SourceError};

use super::BlobStore;

/// Content store rooted at a local directory.
pub struct LocalBlobStore {
    /// Root directory (e.g., ~/.imagesource/content)
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store at `root`, creating its directories if needed.
    pub fn new(root: &Path) -> Result<Self> {
        for dir in [root.join("blobs"), root.join("ingest")] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                SourceError::Other(format!(
                    "Failed to create content directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Path a blob is (or would be) stored at.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm())
            .join(digest.hex())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(digest)).await?)
    }

    async fn read(&self, digest: &Digest) -> Result<Vec<u8>> {
        match tokio::fs::read(self.blob_path(digest)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::BlobNotFound(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, digest: &Digest, data: &[u8]) -> Result<()> {
        digest.verify(data)?;

        let target = self.blob_path(digest);
        if tokio::fs::try_exists(&target).await? {
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let ingest = self
            .root
            .join("ingest")
            .join(format!("{}-{}", digest.hex(), uuid::Uuid::new_v4()));
        tokio::fs::write(&ingest, data).await.map_err(|e| {
            SourceError::Other(format!(
                "Failed to write ingest file {}: {}",
                ingest.display(),
                e
            ))
        })?;

        // Identical content may already have been published by a concurrent
        // writer; the rename replaces it with the same bytes.
        if let Err(e) = tokio::fs::rename(&ingest, &target).await {
            let _ = tokio::fs::remove_file(&ingest).await;
            return Err(SourceError::Other(format!(
                "Failed to commit blob {} to {}: {}",
                digest,
                target.display(),
                e
            )));
        }

        tracing::debug!(
            digest = %digest,
            size = data.len(),
            "Stored blob"
        );

        Ok(())
    }
}
