//! Session store contract and the in-memory implementation.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Durable key-value store with per-key expiry.
///
/// Every operation must be atomic for a single key. There is no cross-key transaction.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Read and delete in one step; at most one caller observes a given value.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    expires_at: Instant,
    value: String,
}

/// Process-local [`SessionStore`]; entries expire lazily when touched.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.inner.write().retain(|_, e| e.expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut map = self.inner.write();
        let Some(entry) = map.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= now {
            map.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        self.inner
            .write()
            .insert(key.to_string(), Entry { expires_at, value });
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entry = self.inner.write().remove(key);
        Ok(entry.filter(|e| e.expires_at > now).map(|e| e.value))
    }
}
