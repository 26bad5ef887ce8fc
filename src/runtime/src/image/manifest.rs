//! Manifest, index and config decoding.
//!
//! OCI and Docker schema2 JSON shapes are decoded with `oci-spec`; everything
//! downstream works with the core `Descriptor` type.

use imagesource_core::config::PlatformConfig;
use imagesource_core::digest::{is_index, is_manifest, Descriptor, Digest};
use imagesource_core::error::{Result, SourceError};
use oci_spec::image::{Descriptor as OciSpecDescriptor, ImageConfiguration, ImageIndex, ImageManifest};

fn corrupt(digest: &Digest, message: impl Into<String>) -> SourceError {
    SourceError::CorruptManifest {
        digest: digest.to_string(),
        message: message.into(),
    }
}

/// Convert an `oci-spec` descriptor, validating its digest and size.
pub fn convert_descriptor(parent: &Digest, desc: &OciSpecDescriptor) -> Result<Descriptor> {
    let digest = Digest::parse(desc.digest())
        .map_err(|e| corrupt(parent, format!("invalid child descriptor: {}", e)))?;
    let size = u64::try_from(desc.size())
        .map_err(|_| corrupt(parent, format!("negative size for {}", digest)))?;

    Ok(Descriptor::new(desc.media_type().to_string(), digest, size))
}

/// Decode an image manifest blob.
pub fn decode_manifest(digest: &Digest, bytes: &[u8]) -> Result<ImageManifest> {
    serde_json::from_slice(bytes)
        .map_err(|e| corrupt(digest, format!("failed to unmarshal manifest: {}", e)))
}

/// Decode an image index / manifest list blob.
pub fn decode_index(digest: &Digest, bytes: &[u8]) -> Result<ImageIndex> {
    serde_json::from_slice(bytes)
        .map_err(|e| corrupt(digest, format!("failed to unmarshal index: {}", e)))
}

/// Decode an image configuration blob.
pub fn decode_config(digest: &Digest, bytes: &[u8]) -> Result<ImageConfiguration> {
    serde_json::from_slice(bytes)
        .map_err(|e| corrupt(digest, format!("failed to unmarshal image config: {}", e)))
}

/// Ordered uncompressed diff ids declared by an image configuration.
pub fn diff_ids(config_digest: &Digest, config: &ImageConfiguration) -> Result<Vec<Digest>> {
    config
        .rootfs()
        .diff_ids()
        .iter()
        .map(|id| {
            Digest::parse(id).map_err(|e| corrupt(config_digest, format!("invalid diff id: {}", e)))
        })
        .collect()
}

fn platform_matches(desc: &OciSpecDescriptor, platform: &PlatformConfig) -> bool {
    match desc.platform() {
        Some(p) => platform.matches(
            &p.os().to_string(),
            &p.architecture().to_string(),
            p.variant().as_deref(),
        ),
        None => true,
    }
}

/// Children of a manifest (config then layers) or of an index (its manifests).
///
/// Index entries are filtered by `platform` when given; entries that declare
/// no platform are always kept. Leaf blobs have no children.
pub fn children(
    desc: &Descriptor,
    bytes: &[u8],
    platform: Option<&PlatformConfig>,
) -> Result<Vec<Descriptor>> {
    if is_manifest(&desc.media_type) {
        let manifest = decode_manifest(&desc.digest, bytes)?;
        std::iter::once(manifest.config())
            .chain(manifest.layers().iter())
            .map(|child| convert_descriptor(&desc.digest, child))
            .collect()
    } else if is_index(&desc.media_type) {
        let index = decode_index(&desc.digest, bytes)?;
        index
            .manifests()
            .iter()
            .filter(|entry| platform.map_or(true, |p| platform_matches(entry, p)))
            .map(|entry| convert_descriptor(&desc.digest, entry))
            .collect()
    } else {
        Ok(Vec::new())
    }
}

/// Pick the manifest for `platform` out of an index.
pub fn select_manifest(
    index_digest: &Digest,
    index: &ImageIndex,
    platform: &PlatformConfig,
) -> Result<Descriptor> {
    let entry = index
        .manifests()
        .iter()
        .find(|entry| is_manifest(&entry.media_type().to_string()) && platform_matches(entry, platform))
        .ok_or_else(|| {
            corrupt(
                index_digest,
                format!(
                    "no manifest for platform {}/{}",
                    platform.os, platform.architecture
                ),
            )
        })?;

    convert_descriptor(index_digest, entry)
}
