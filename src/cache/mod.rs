//! Fast-store port for the cache-aside resolver.
//!
//! Values are opaque bytes; the resolver decides the encoding. Every failure
//! here is recoverable and the resolver treats it as a miss.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::{CacheBackend, CacheConfig};

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("fast store unavailable: {0}")]
    Unavailable(String),
    #[error("fast store error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait FastStore: Send + Sync {
    /// `Ok(None)` is a plain miss
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;
}

/// Fast-store key for a short code
pub fn cache_key(short_code: &str) -> String {
    format!("url:{short_code}")
}

/// Build the configured fast store
pub async fn connect(config: &CacheConfig) -> anyhow::Result<Arc<dyn FastStore>> {
    match config.backend {
        CacheBackend::Memory => {
            info!(max_entries = config.max_entries, "Using in-process fast store");
            Ok(Arc::new(MemoryStore::new(config.max_entries)))
        }
        CacheBackend::Redis => {
            info!("Using Redis fast store");
            Ok(Arc::new(RedisStore::connect(&config.redis_url).await?))
        }
    }
}
