//! Local attempt store.
//!
//! A flat string key-value store holding verification state, failure
//! counters, and access logs. There are no multi-key transactions: a
//! counter write and its timestamp write can interleave with another
//! client of the same namespace.
//!
//! ## Backends
//! - `MemoryStore` - in-process map (tests, no Redis configured)
//! - `RedisStore` - Redis via an auto-reconnecting connection manager
//!
//! Components never see raw keys; they go through `GateRepository`.

mod memory;
mod redis_backend;
mod repository;

pub use self::memory::MemoryStore;
pub use self::redis_backend::RedisStore;
pub use self::repository::{GateRepository, LimiterPath, LogStream};

use anyhow::Result;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use gatehouse_common::GateError;
use gatehouse_common::constants::CLIENT_NAMESPACE_PREFIX;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Minimal key-value contract
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Round-trip check used by the readiness endpoint
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// A backend view restricted to one key prefix
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Namespace for a browser client identity
    ///
    /// The identity is hashed so arbitrary header content can never reach
    /// the key space or collide with another client's prefix.
    pub fn for_client(inner: Arc<dyn KeyValueStore>, client_id: &str) -> Self {
        Self::new(inner, client_namespace(client_id))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl KeyValueStore for ScopedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(&self.key(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(&self.key(key)).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Map a backend failure into the gate taxonomy
pub fn store_error(err: anyhow::Error) -> GateError {
    tracing::warn!(error = %err, "Store operation failed");
    GateError::Store(format!("{err:#}"))
}

/// gate:{base64url(sha256(client_id))}:
pub fn client_namespace(client_id: &str) -> String {
    let digest = Sha256::digest(client_id.as_bytes());
    format!("{}{}:", CLIENT_NAMESPACE_PREFIX, URL_SAFE_NO_PAD.encode(digest))
}
