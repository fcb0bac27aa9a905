//! Storage backends for learned schema records.
//!
//! Production uses Workers KV; native builds get an in-memory store with the
//! same contract so the request pipeline and tests run unchanged.

use super::{LearnIndex, LearnedEntityRecord};

const ENTITY_KEY_PREFIX: &str = "learn:entity:";
const INDEX_KEY: &str = "learn:index:v1";

fn entity_key(entity_lc: &str) -> String {
    format!("{}{}", ENTITY_KEY_PREFIX, entity_lc)
}

/// Key-value persistence for the learner. Entities are keyed lowercased.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait LearnStore {
    async fn read_record(&self, entity_lc: &str) -> Result<Option<LearnedEntityRecord>, String>;
    async fn write_record(
        &self,
        entity_lc: &str,
        record: &LearnedEntityRecord,
    ) -> Result<(), String>;
    async fn read_index(&self) -> Result<Option<LearnIndex>, String>;
    async fn write_index(&self, index: &LearnIndex) -> Result<(), String>;
}

/// Workers KV binding (`LEARNING_KV`).
#[cfg(target_arch = "wasm32")]
#[derive(Clone)]
pub struct KvLearnStore {
    kv: worker::kv::KvStore,
}

#[cfg(target_arch = "wasm32")]
impl KvLearnStore {
    pub fn new(kv: worker::kv::KvStore) -> Self {
        Self { kv }
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait::async_trait(?Send)]
impl LearnStore for KvLearnStore {
    async fn read_record(&self, entity_lc: &str) -> Result<Option<LearnedEntityRecord>, String> {
        self.kv
            .get(&entity_key(entity_lc))
            .json::<LearnedEntityRecord>()
            .await
            .map_err(|e| format!("KV read failed: {}", worker::Error::from(e)))
    }

    async fn write_record(
        &self,
        entity_lc: &str,
        record: &LearnedEntityRecord,
    ) -> Result<(), String> {
        self.kv
            .put(&entity_key(entity_lc), record)
            .map_err(|e| format!("KV put failed: {}", worker::Error::from(e)))?
            .execute()
            .await
            .map_err(|e| format!("KV write failed: {}", worker::Error::from(e)))
    }

    async fn read_index(&self) -> Result<Option<LearnIndex>, String> {
        self.kv
            .get(INDEX_KEY)
            .json::<LearnIndex>()
            .await
            .map_err(|e| format!("KV read failed: {}", worker::Error::from(e)))
    }

    async fn write_index(&self, index: &LearnIndex) -> Result<(), String> {
        self.kv
            .put(INDEX_KEY, index)
            .map_err(|e| format!("KV put failed: {}", worker::Error::from(e)))?
            .execute()
            .await
            .map_err(|e| format!("KV write failed: {}", worker::Error::from(e)))
    }
}

/// In-memory store for the native dev server and tests. Values are kept as
/// serialised JSON so the round-trip matches KV behavior.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Default)]
pub struct MemoryLearnStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(not(target_arch = "wasm32"))]
impl MemoryLearnStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, String> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .get(key)
            .map(|raw| serde_json::from_str(raw).map_err(|e| format!("corrupt record: {}", e)))
            .transpose()
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), String> {
        let raw = serde_json::to_string(value).map_err(|e| format!("serialize failed: {}", e))?;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), raw);
        Ok(())
    }

    /// Raw `(key, json)` pairs, for confidentiality assertions in tests.
    pub async fn raw_entries(&self) -> Vec<(String, String)> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait::async_trait]
impl LearnStore for MemoryLearnStore {
    async fn read_record(&self, entity_lc: &str) -> Result<Option<LearnedEntityRecord>, String> {
        self.read_json(&entity_key(entity_lc))
    }

    async fn write_record(
        &self,
        entity_lc: &str,
        record: &LearnedEntityRecord,
    ) -> Result<(), String> {
        self.write_json(&entity_key(entity_lc), record)
    }

    async fn read_index(&self) -> Result<Option<LearnIndex>, String> {
        self.read_json(INDEX_KEY)
    }

    async fn write_index(&self, index: &LearnIndex) -> Result<(), String> {
        self.write_json(INDEX_KEY, index)
    }
}
