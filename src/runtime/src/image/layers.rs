//! Layer resolution.
//!
//! Pairs the compressed layer descriptors of a manifest with the uncompressed
//! diff ids of its image config, preserving manifest order.

use imagesource_core::config::PlatformConfig;
use imagesource_core::digest::{is_index, Descriptor, Digest, MEDIA_TYPE_OCI_LAYER};
use imagesource_core::error::{Result, SourceError};

use super::manifest;
use crate::content::BlobStore;

/// A layer: uncompressed diff identity plus its compressed transport blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Uncompressed content; media type is always the plain layer type
    pub diff: Descriptor,
    /// Blob as listed in the manifest; carries the original compression
    pub blob: Descriptor,
}

/// Resolve the ordered layers of the image rooted at `desc`.
///
/// `desc` may be a manifest or an index; for an index the manifest matching
/// `platform` is used. All blobs must already be in `store`.
pub async fn resolve_layers(
    store: &dyn BlobStore,
    desc: &Descriptor,
    platform: &PlatformConfig,
) -> Result<Vec<Layer>> {
    let manifest_desc = if is_index(&desc.media_type) {
        let bytes = store.read(&desc.digest).await?;
        let index = manifest::decode_index(&desc.digest, &bytes)?;
        manifest::select_manifest(&desc.digest, &index, platform)?
    } else {
        desc.clone()
    };

    let bytes = store.read(&manifest_desc.digest).await?;
    let image_manifest = manifest::decode_manifest(&manifest_desc.digest, &bytes)?;

    let config_desc = manifest::convert_descriptor(&manifest_desc.digest, image_manifest.config())?;
    let config_bytes = store.read(&config_desc.digest).await?;
    let config = manifest::decode_config(&config_desc.digest, &config_bytes)?;
    let diff_ids = manifest::diff_ids(&config_desc.digest, &config)?;

    let blobs = image_manifest
        .layers()
        .iter()
        .map(|layer| manifest::convert_descriptor(&manifest_desc.digest, layer))
        .collect::<Result<Vec<_>>>()?;

    if diff_ids.len() != blobs.len() {
        return Err(SourceError::CorruptManifest {
            digest: manifest_desc.digest.to_string(),
            message: format!(
                "mismatched image rootfs and manifest layers: {} diff ids, {} layers",
                diff_ids.len(),
                blobs.len()
            ),
        });
    }

    Ok(pair_layers(diff_ids, blobs))
}

fn pair_layers(diff_ids: Vec<Digest>, blobs: Vec<Descriptor>) -> Vec<Layer> {
    diff_ids
        .into_iter()
        .zip(blobs)
        .map(|(diff, blob)| Layer {
            diff: Descriptor::new(MEDIA_TYPE_OCI_LAYER, diff, 0),
            blob,
        })
        .collect()
}
