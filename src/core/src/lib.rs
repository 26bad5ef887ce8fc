//! imagesource Core - Foundational Types
//!
//! Error taxonomy, configuration, logging setup, the digest/descriptor model
//! and the chain identity fold shared by the image source runtime.

pub mod config;
pub mod digest;
pub mod error;
pub mod identity;
pub mod log;

// Re-export commonly used types
pub use config::{LogConfig, LogFormat, LogLevel, PlatformConfig, RegistryConfig, RegistryProtocol, SourceConfig};
pub use digest::{Descriptor, Digest};
pub use error::{Result, SourceError};
pub use identity::{chain_id, chain_ids, ChainId};

/// imagesource version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
