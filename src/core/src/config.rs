use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SourceError};

/// Environment variable overriding `root_dir`.
pub const ROOT_DIR_ENV: &str = "IMAGESOURCE_ROOT";

/// Image source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root directory for the content store and the blob mapping
    pub root_dir: PathBuf,

    /// Upper bound on sibling blobs fetched concurrently
    pub max_concurrent_fetches: usize,

    /// Platform used to pick a manifest out of a manifest list
    pub platform: PlatformConfig,

    /// Registry client configuration
    pub registry: RegistryConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            max_concurrent_fetches: 4,
            platform: PlatformConfig::default(),
            registry: RegistryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl SourceConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension).
    ///
    /// `IMAGESOURCE_ROOT` overrides `root_dir` when set.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SourceError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config: SourceConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };

        if let Ok(root) = std::env::var(ROOT_DIR_ENV) {
            if !root.is_empty() {
                config.root_dir = PathBuf::from(root);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(SourceError::ConfigError(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.platform.os.is_empty() || self.platform.architecture.is_empty() {
            return Err(SourceError::ConfigError(
                "platform os and architecture must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding content-addressed blobs.
    pub fn content_dir(&self) -> PathBuf {
        self.root_dir.join("content")
    }

    /// File persisting chain → blob associations.
    pub fn blob_mapping_path(&self) -> PathBuf {
        self.root_dir.join("blobmap.json")
    }
}

fn default_root_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".imagesource")
}

/// Target platform for manifest list resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Operating system (e.g., "linux")
    pub os: String,

    /// OCI architecture name (e.g., "amd64", "arm64")
    pub architecture: String,

    /// CPU variant (e.g., "v7" for arm); any variant matches when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self {
            os: "linux".to_string(),
            architecture: architecture.to_string(),
            variant: None,
        }
    }
}

impl PlatformConfig {
    /// Whether an index entry's platform is acceptable. A configured variant
    /// rejects entries that declare a different one.
    pub fn matches(&self, os: &str, architecture: &str, variant: Option<&str>) -> bool {
        if self.os != os || self.architecture != architecture {
            return false;
        }
        match (self.variant.as_deref(), variant) {
            (Some(wanted), Some(declared)) => wanted == declared,
            _ => true,
        }
    }
}

/// Registry client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Protocol used for registries not listed in `insecure_registries`
    pub protocol: RegistryProtocol,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,
}

/// Registry transport protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryProtocol {
    #[default]
    Https,
    Http,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
