//! InMemoryDocumentStore - HashMap-backed document store for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use super::{
    Charged, DocumentKey, DocumentStore, Precondition, RequestCharge, StoreError, StoredDocument,
    VersionToken,
};
use crate::config::StoreConfig;

const READ_CHARGE: RequestCharge = RequestCharge(1.0);
const WRITE_CHARGE: RequestCharge = RequestCharge(5.0);

/// In-memory document store backed by a HashMap.
///
/// Storage key is `"partition:id"`. Version tokens are opaque etags drawn
/// from a store-wide counter, so a token never repeats. Clone-friendly via Arc.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    storage: Arc<RwLock<HashMap<String, StoredDocument>>>,
    next_version: Arc<AtomicU64>,
    latency: Option<Duration>,
    config: StoreConfig,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Create a new empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a new empty store for the given database and view collection.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
            latency: None,
            config,
        }
    }

    /// Simulate network latency on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current document stored under `key`, bypassing charges and latency.
    pub fn document(&self, key: &DocumentKey) -> Option<StoredDocument> {
        self.storage
            .read()
            .ok()
            .and_then(|storage| storage.get(&Self::make_key(key)).cloned())
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All storage keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .storage
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn make_key(key: &DocumentKey) -> String {
        format!("{}:{}", key.partition, key.id)
    }

    fn mint_version(&self) -> VersionToken {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst);
        VersionToken::new(URL_SAFE_NO_PAD.encode(format!("{:016x}", n)))
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, key: &DocumentKey) -> Result<Charged<Option<StoredDocument>>, StoreError> {
        self.maybe_delay().await;

        let storage = self
            .storage
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;

        let document = storage.get(&Self::make_key(key)).cloned();
        Ok(Charged::new(document, READ_CHARGE))
    }

    async fn upsert(
        &self,
        key: &DocumentKey,
        body: Value,
        precondition: Precondition,
    ) -> Result<Charged<VersionToken>, StoreError> {
        self.maybe_delay().await;

        if !body.is_object() {
            return Err(StoreError::Serde(format!(
                "document {} must be a JSON object",
                key
            )));
        }

        let mut storage = self
            .storage
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;

        let storage_key = Self::make_key(key);
        let current = storage.get(&storage_key).map(|stored| &stored.version);

        match (&precondition, current) {
            (Precondition::None, _) => {}
            (Precondition::IfMatch(expected), Some(actual)) if expected == actual => {}
            (Precondition::IfAbsent, None) => {}
            _ => return Err(StoreError::conflict(key)),
        }

        let version = self.mint_version();
        storage.insert(
            storage_key,
            StoredDocument {
                body,
                version: version.clone(),
            },
        );

        Ok(Charged::new(version, WRITE_CHARGE))
    }
}
