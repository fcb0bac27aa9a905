//! Background schema learning.
//!
//! The learner records which top-level field names appear on each entity's
//! rows, never their values. It runs strictly after the client response has
//! been dispatched, and every failure is swallowed: a broken learner must not
//! be observable from the outside.

use std::collections::BTreeSet;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::clock;

mod store;

pub use store::LearnStore;
#[cfg(not(target_arch = "wasm32"))]
pub use store::MemoryLearnStore;
#[cfg(target_arch = "wasm32")]
pub use store::KvLearnStore;

/// Rows inspected per response; also the ceiling for `sampleCount`.
pub const MAX_SAMPLE_ROWS: usize = 5;

/// A record with no new fields is still rewritten this often, to keep
/// `lastSeenIso` meaningful.
const REWRITE_INTERVAL_MS: i64 = 24 * 60 * 60 * 1000;

/// Learned schema for one entity. Field names only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedEntityRecord {
    pub fields: Vec<String>,
    pub field_count: usize,
    pub sample_count: usize,
    pub last_seen_iso: String,
    pub last_write_ms: i64,
}

/// Index of entities with a learned record, lexicographically ordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnIndex {
    pub entities: Vec<String>,
    pub last_write_ms: i64,
}

/// Record field names observed in a feed response. Background entry point;
/// never fails outward.
pub async fn observe<S: LearnStore + ?Sized>(store: &S, entity: &str, body: &[u8]) {
    if let Err(e) = observe_inner(store, entity, body).await {
        warn!(entity, error = %e, "schema learning failed");
    }
}

async fn observe_inner<S: LearnStore + ?Sized>(
    store: &S,
    entity: &str,
    body: &[u8],
) -> Result<(), String> {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };
    let rows = match parsed.get("value").and_then(Value::as_array) {
        Some(rows) if !rows.is_empty() => rows,
        _ => return Ok(()),
    };

    let sampled = rows.len().min(MAX_SAMPLE_ROWS);
    let discovered = extract_fields(&rows[..sampled]);
    if discovered.is_empty() {
        return Ok(());
    }

    let entity_lc = entity.to_lowercase();
    let now = clock::now_ms();

    let existing = store.read_record(&entity_lc).await?;
    let (record, should_write) = merge_record(existing, &discovered, sampled, now);
    if should_write {
        debug!(
            entity = %entity_lc,
            fields = record.field_count,
            "writing learned schema record"
        );
        store.write_record(&entity_lc, &record).await?;
    }

    let index = store.read_index().await?.unwrap_or_default();
    if !index.entities.iter().any(|e| e == &entity_lc) {
        let mut entities = index.entities;
        entities.push(entity_lc);
        entities.sort();
        store
            .write_index(&LearnIndex {
                entities,
                last_write_ms: now,
            })
            .await?;
    }

    Ok(())
}

/// Union of top-level property names across the sampled rows, `@odata.*`
/// annotations excluded.
fn extract_fields(rows: &[Value]) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    for row in rows {
        if let Some(map) = row.as_object() {
            for key in map.keys() {
                if !key.starts_with("@odata.") {
                    fields.insert(key.clone());
                }
            }
        }
    }
    fields
}

/// Merge newly discovered fields into an existing record.
///
/// The second element says whether the record is due for a KV write: a new
/// field appeared, or the last write is older than [`REWRITE_INTERVAL_MS`].
fn merge_record(
    existing: Option<LearnedEntityRecord>,
    discovered: &BTreeSet<String>,
    sampled: usize,
    now_ms: i64,
) -> (LearnedEntityRecord, bool) {
    let mut merged: BTreeSet<String> = existing
        .as_ref()
        .map(|r| r.fields.iter().cloned().collect())
        .unwrap_or_default();

    let mut new_field = false;
    for field in discovered {
        if merged.insert(field.clone()) {
            new_field = true;
        }
    }

    let rewrite_due = existing
        .as_ref()
        .map(|r| now_ms - r.last_write_ms > REWRITE_INTERVAL_MS)
        .unwrap_or(true);

    let prior_samples = existing.as_ref().map(|r| r.sample_count).unwrap_or(0);
    let record = LearnedEntityRecord {
        field_count: merged.len(),
        fields: merged.into_iter().collect(),
        sample_count: (prior_samples + sampled).min(MAX_SAMPLE_ROWS),
        last_seen_iso: iso_timestamp(now_ms),
        last_write_ms: now_ms,
    };

    (record, new_field || rewrite_due)
}

fn iso_timestamp(now_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(now_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Build the `$learn-summary` document.
///
/// With an entity name, returns `{record: <record|null>}`; otherwise reads the
/// index and fetches every referenced record concurrently.
pub async fn summary<S: LearnStore + ?Sized>(
    store: &S,
    entity: Option<&str>,
) -> Result<Value, String> {
    if let Some(entity) = entity {
        let record = store.read_record(&entity.to_lowercase()).await?;
        return Ok(json!({ "record": record }));
    }

    let index = store.read_index().await?.unwrap_or_default();
    let fetches = index.entities.iter().map(|name| store.read_record(name));
    let results = futures::future::join_all(fetches).await;

    let mut records = Vec::with_capacity(results.len());
    for (name, result) in index.entities.iter().zip(results) {
        match result {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!(entity = %name, error = %e, "failed to read learned record"),
        }
    }

    Ok(json!({
        "learningEnabled": true,
        "entityCount": index.entities.len(),
        "entities": index.entities,
        "records": records,
    }))
}
