//! Concurrent `public_key -> IdentityRecord` map, written by three
//! independent sources and read by the monitor (§4.6).

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::model::IdentityRecord;
use crate::peer_config;

#[derive(Default)]
pub struct IdentityCache {
    inner: RwLock<HashMap<String, IdentityRecord>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, public_key: String, record: IdentityRecord) {
        self.inner.write().expect("identity cache lock poisoned").insert(public_key, record);
    }

    pub fn upsert_many(&self, records: impl IntoIterator<Item = (String, IdentityRecord)>) {
        let mut guard = self.inner.write().expect("identity cache lock poisoned");
        for (pk, record) in records {
            guard.insert(pk, record);
        }
    }

    pub fn get(&self, public_key: &str) -> Option<IdentityRecord> {
        self.inner.read().expect("identity cache lock poisoned").get(public_key).cloned()
    }

    /// Rehydrates every identity found in `text` (a rendered interface
    /// config) into the cache. Used on cold start and on cache miss.
    pub fn warm_from_config_text(&self, text: &str) {
        self.upsert_many(peer_config::parse_identity_blocks(text));
    }

    /// Looks up `public_key`; on miss, re-reads `config_path` and retries
    /// once. Mirrors the "runtime parser on cache miss" recovery path
    /// described in §4.5/§4.6.
    pub async fn get_or_rehydrate(&self, public_key: &str, config_path: &Path) -> Option<IdentityRecord> {
        if let Some(record) = self.get(public_key) {
            return Some(record);
        }
        match tokio::fs::read_to_string(config_path).await {
            Ok(text) => {
                self.warm_from_config_text(&text);
                self.get(public_key)
            }
            Err(e) => {
                tracing::warn!(public_key, path = %config_path.display(), error = %e, "failed to rehydrate identity cache");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("identity cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
