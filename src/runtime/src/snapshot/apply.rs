//! Folds an ordered layer list into a snapshot chain.

use imagesource_core::error::{Result, SourceError};
use imagesource_core::identity::ChainId;
use tokio_util::sync::CancellationToken;

use super::{BlobMapping, DiffApplier, Snapshotter};
use crate::image::Layer;

/// Applies layers bottom to top, recording a mapping entry per layer.
pub struct ChainApplier<'a> {
    snapshotter: &'a dyn Snapshotter,
    applier: &'a dyn DiffApplier,
    mapping: &'a dyn BlobMapping,
}

impl<'a> ChainApplier<'a> {
    pub fn new(
        snapshotter: &'a dyn Snapshotter,
        applier: &'a dyn DiffApplier,
        mapping: &'a dyn BlobMapping,
    ) -> Self {
        Self {
            snapshotter,
            applier,
            mapping,
        }
    }

    /// Apply `layers` in order and return the final chain identity
    /// (`None` for an empty list).
    ///
    /// Snapshots that already exist are reused without re-applying. On error
    /// the snapshots created for earlier layers stay in place.
    pub async fn apply_layers(
        &self,
        layers: &[Layer],
        cancel: &CancellationToken,
    ) -> Result<Option<ChainId>> {
        let mut current: Option<ChainId> = None;

        for layer in layers {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled("layer apply".to_string()));
            }

            let chain_id = ChainId::extend(current.as_ref(), &layer.diff.digest);

            if self.snapshotter.exists(&chain_id).await? {
                tracing::debug!(
                    chain_id = %chain_id,
                    diff = %layer.diff.digest,
                    "Snapshot exists, skipping apply"
                );
                self.record_existing(&chain_id, layer).await?;
            } else {
                self.apply_one(current.as_ref(), &chain_id, layer, cancel).await?;
                self.record(&chain_id, layer).await?;
            }

            current = Some(chain_id);
        }

        Ok(current)
    }

    async fn apply_one(
        &self,
        parent: Option<&ChainId>,
        expected: &ChainId,
        layer: &Layer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!(
            chain_id = %expected,
            blob = %layer.blob.digest,
            "Applying layer"
        );

        let applied = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SourceError::Cancelled("layer apply".to_string()));
            }
            result = self.applier.apply(parent, layer) => result.map_err(|e| match e {
                SourceError::ApplyError { .. } | SourceError::Cancelled(_) => e,
                other => SourceError::ApplyError {
                    digest: layer.diff.digest.to_string(),
                    message: other.to_string(),
                },
            })?,
        };

        if &applied != expected {
            return Err(SourceError::ApplyError {
                digest: layer.diff.digest.to_string(),
                message: format!(
                    "applier produced chain {}, expected {}",
                    applied, expected
                ),
            });
        }
        Ok(())
    }

    async fn record(&self, chain_id: &ChainId, layer: &Layer) -> Result<()> {
        self.mapping
            .set_blob(chain_id, &layer.blob.digest)
            .await
            .map_err(|e| mapping_error(chain_id, e))
    }

    /// Reused snapshots keep whatever blob they were first recorded with.
    async fn record_existing(&self, chain_id: &ChainId, layer: &Layer) -> Result<()> {
        let recorded = self
            .mapping
            .get_blob(chain_id)
            .await
            .map_err(|e| mapping_error(chain_id, e))?;

        match recorded {
            Some(existing) if existing != layer.blob.digest => {
                tracing::debug!(
                    chain_id = %chain_id,
                    recorded = %existing,
                    blob = %layer.blob.digest,
                    "Snapshot was produced from a different blob"
                );
                Ok(())
            }
            Some(_) => Ok(()),
            None => self.record(chain_id, layer).await,
        }
    }
}

fn mapping_error(chain_id: &ChainId, err: SourceError) -> SourceError {
    match err {
        SourceError::MappingWriteError { .. } => err,
        other => SourceError::MappingWriteError {
            chain_id: chain_id.to_string(),
            message: other.to_string(),
        },
    }
}
