//! Cache accessor interface.
//!
//! The build cache owns snapshot lifetimes; a pull hands it the final chain
//! identity and gets back a handle the caller can hold.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use imagesource_core::error::Result;
use imagesource_core::identity::ChainId;

/// Caller-facing handle to a committed snapshot.
pub trait ImmutableRef: Send + Sync + Debug {
    fn chain_id(&self) -> &ChainId;
}

/// Turns a chain identity into an immutable reference.
#[async_trait]
pub trait CacheAccessor: Send + Sync {
    async fn get(&self, chain_id: &ChainId) -> Result<Arc<dyn ImmutableRef>>;
}
