//! Key/value backends for fleet coordination

use async_trait::async_trait;
use std::collections::HashMap;
use tally_core::Result;
use tokio::sync::RwLock;
use tracing::instrument;

/// A shared key/value store with an atomic "set if absent"
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Name used to select this backend
    fn name(&self) -> &str;

    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` only if nothing is stored yet
    ///
    /// Returns `true` if this call wrote the value. Must be a single atomic
    /// operation at the store level.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;
}

/// Process-local backend
///
/// Shares state between everything in one process that holds the same
/// backend, which is enough for a single host and for tests.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    values: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut values = self.values.write().await;
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}
