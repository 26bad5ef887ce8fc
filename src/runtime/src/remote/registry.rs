//! Registry-backed resolver.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, etc.). Transport, TLS and token negotiation are
//! entirely that crate's concern; this adapter only maps its calls onto
//! `Resolver` / `Fetcher`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use imagesource_core::config::{RegistryConfig, RegistryProtocol};
use imagesource_core::digest::{
    Descriptor, Digest, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
};
use imagesource_core::error::{Result, SourceError};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use parking_lot::Mutex;

use super::{Fetcher, Resolver};

/// Manifest media types requested when resolving a reference.
const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST,
];

/// Registry credentials; `None` pulls anonymously.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth(Option<(String, String)>);

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self(None)
    }

    /// Basic credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD` when
    /// both are set.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME"),
            std::env::var("REGISTRY_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Self(Some((username, password))),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match &self.0 {
            Some((username, password)) => {
                OciRegistryAuth::Basic(username.clone(), password.clone())
            }
            None => OciRegistryAuth::Anonymous,
        }
    }
}

/// Manifest bytes from a resolve, keyed by canonical reference until the
/// matching fetcher takes them.
type ResolvedManifests = Arc<Mutex<HashMap<String, (Digest, Vec<u8>)>>>;

/// Resolves references against container registries.
pub struct RegistryResolver {
    client: Arc<Client>,
    auth: RegistryAuth,
    resolved: ResolvedManifests,
}

impl RegistryResolver {
    /// Create a resolver with the given client configuration and credentials.
    pub fn new(config: &RegistryConfig, auth: RegistryAuth) -> Self {
        let client = Client::new(ClientConfig {
            protocol: client_protocol(config),
            ..Default::default()
        });

        Self {
            client: Arc::new(client),
            auth,
            resolved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn remember(&self, canonical: &str, digest: Digest, bytes: Vec<u8>) {
        self.resolved
            .lock()
            .insert(canonical.to_string(), (digest, bytes));
    }
}

fn client_protocol(config: &RegistryConfig) -> ClientProtocol {
    match config.protocol {
        RegistryProtocol::Http => ClientProtocol::Http,
        RegistryProtocol::Https if config.insecure_registries.is_empty() => ClientProtocol::Https,
        RegistryProtocol::Https => ClientProtocol::HttpsExcept(config.insecure_registries.clone()),
    }
}

fn parse_reference(reference: &str) -> Result<Reference> {
    reference
        .parse::<Reference>()
        .map_err(|e| SourceError::ResolveError {
            reference: reference.to_string(),
            message: format!("invalid reference: {}", e),
        })
}

/// Media type declared by a manifest body, falling back to its shape.
fn manifest_media_type(bytes: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(bytes).unwrap_or_default();
    match value.get("mediaType").and_then(|m| m.as_str()) {
        Some(media_type) => media_type.to_string(),
        None if value.get("manifests").is_some() => MEDIA_TYPE_OCI_INDEX.to_string(),
        None => MEDIA_TYPE_OCI_MANIFEST.to_string(),
    }
}

#[async_trait]
impl Resolver for RegistryResolver {
    async fn resolve(&self, reference: &str) -> Result<(String, Descriptor)> {
        let oci_ref = parse_reference(reference)?;

        tracing::debug!(reference = %oci_ref, "Resolving image reference");

        let (bytes, manifest_digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.auth.to_oci_auth(), ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| SourceError::ResolveError {
                reference: reference.to_string(),
                message: format!("Failed to pull manifest: {}", e),
            })?;

        let digest = Digest::parse(&manifest_digest)?;
        digest.verify(&bytes).map_err(|e| SourceError::ResolveError {
            reference: reference.to_string(),
            message: e.to_string(),
        })?;

        let desc = Descriptor::new(manifest_media_type(&bytes), digest.clone(), bytes.len() as u64);
        let canonical = oci_ref.whole();
        self.remember(&canonical, digest, bytes);

        Ok((canonical, desc))
    }

    async fn fetcher(&self, canonical: &str) -> Result<Arc<dyn Fetcher>> {
        let reference = parse_reference(canonical)?;
        let resolved = self.resolved.lock().remove(canonical);

        Ok(Arc::new(RegistryFetcher {
            client: self.client.clone(),
            auth: self.auth.clone(),
            reference,
            resolved,
        }))
    }
}

/// Fetches blobs and manifests of one repository.
struct RegistryFetcher {
    client: Arc<Client>,
    auth: RegistryAuth,
    reference: Reference,
    resolved: Option<(Digest, Vec<u8>)>,
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let fetch_error = |e: oci_distribution::errors::OciDistributionError| SourceError::FetchError {
            digest: desc.digest.to_string(),
            message: e.to_string(),
        };

        if desc.has_children() {
            if let Some((digest, bytes)) = &self.resolved {
                if digest == &desc.digest {
                    return Ok(bytes.clone());
                }
            }

            let by_digest = Reference::with_digest(
                self.reference.registry().to_string(),
                self.reference.repository().to_string(),
                desc.digest.to_string(),
            );
            let (bytes, _) = self
                .client
                .pull_manifest_raw(&by_digest, &self.auth.to_oci_auth(), &[desc.media_type.as_str()])
                .await
                .map_err(fetch_error)?;
            return Ok(bytes);
        }

        tracing::debug!(
            digest = %desc.digest,
            size = desc.size,
            "Pulling blob"
        );

        let size = i64::try_from(desc.size).map_err(|_| SourceError::FetchError {
            digest: desc.digest.to_string(),
            message: format!("declared size {} is out of range", desc.size),
        })?;
        let oci_desc = OciDescriptor {
            media_type: desc.media_type.clone(),
            digest: desc.digest.to_string(),
            size,
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&self.reference, &oci_desc, &mut data)
            .await
            .map_err(fetch_error)?;

        Ok(data)
    }
}
