//! Key/value storage for correlation state
//!
//! The transport only needs Redis-like primitives: set, expire, get, delete
//! and an atomic increment. Backends: [`MemoryStore`] for single-process
//! deployments and tests, and LumaDB ([`brivas_lumadb::LumaKv`]) when state
//! must survive restarts.

mod lumadb;
mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },
}

impl From<brivas_lumadb::LumaDbError> for StoreError {
    fn from(err: brivas_lumadb::LumaDbError) -> Self {
        match err {
            brivas_lumadb::LumaDbError::NotAnInteger { key } => StoreError::NotAnInteger { key },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Overwrite `key`, clearing any previous expiry
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomic increment, starting from zero for a missing key
    async fn incr(&self, key: &str) -> StoreResult<i64>;
}

/// Prefixes every key so several transports can share one backend
#[derive(Clone)]
pub struct NamespacedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl NamespacedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl KeyValueStore for NamespacedStore {
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(&self.key(key), value).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire(&self.key(key), ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(&self.key(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(&self.key(key)).await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.inner.incr(&self.key(key)).await
    }
}
