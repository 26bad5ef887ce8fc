use thiserror::Error;

/// imagesource error types
#[derive(Error, Debug)]
pub enum SourceError {
    /// Reference could not be resolved to a root descriptor
    #[error("Resolve failed: {reference} - {message}")]
    ResolveError { reference: String, message: String },

    /// Transport failure while fetching a specific blob
    #[error("Fetch failed: {digest} - {message}")]
    FetchError { digest: String, message: String },

    /// Structural mismatch between manifest and config, or undecodable content
    #[error("Corrupt manifest: {digest} - {message}")]
    CorruptManifest { digest: String, message: String },

    /// Diff application failed
    #[error("Apply failed: {digest} - {message}")]
    ApplyError { digest: String, message: String },

    /// Persisting a chain → blob association failed
    #[error("Blob mapping write failed: {chain_id} - {message}")]
    MappingWriteError { chain_id: String, message: String },

    /// Blob is not present in the content store
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Content does not hash to the expected digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Malformed digest string
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Identifier cannot be handled by this source
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Capability or content the core cannot handle
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation aborted through its cancellation token
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Name of the pipeline stage this error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            SourceError::ResolveError { .. } => "resolve",
            SourceError::FetchError { .. } | SourceError::DigestMismatch { .. } => "fetch",
            SourceError::CorruptManifest { .. } => "manifest",
            SourceError::ApplyError { .. } => "apply",
            SourceError::MappingWriteError { .. } => "mapping",
            SourceError::BlobNotFound(_) | SourceError::IoError(_) => "content",
            SourceError::InvalidDigest(_) | SourceError::InvalidIdentifier(_) => "input",
            SourceError::Cancelled(_) => "cancelled",
            SourceError::ConfigError(_) | SourceError::Unsupported(_) => "config",
            SourceError::SerializationError(_) | SourceError::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SourceError {
    fn from(err: serde_yaml::Error) -> Self {
        SourceError::SerializationError(err.to_string())
    }
}

/// Result type alias for imagesource operations
pub type Result<T> = std::result::Result<T, SourceError>;
