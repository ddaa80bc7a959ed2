//! # Response Cache
//!
//! Reads (list and details) are cached as whole envelopes under a deterministic key:
//!
//! ```text
//! companies:list:{"b":{},"p":{},"q":[["page","2"],["sort.name","asc"]],"r":[]}
//! ```
//!
//! Object keys are sorted; query pairs keep their order since sort directives depend on it.
//! Writes invalidate every key of their section (or the whole cache, when configured).

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::ActionKind;
use crate::response::Envelope;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Envelope>;

    async fn set(&self, key: &str, value: Envelope, ttl: Duration);

    async fn del(&self, key: &str);

    async fn flush(&self);

    /// Drop every key starting with `prefix`. Backends without prefix scans flush everything.
    async fn invalidate_prefix(&self, _prefix: &str) {
        self.flush().await;
    }
}

struct Entry {
    value: Envelope,
    expires_at: Instant,
}

/// In-process cache with per-entry expiry and a bound on the number of keys.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_keys: usize,
}

impl MemoryCache {
    #[must_use]
    pub fn new(max_keys: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_keys: max_keys.max(1),
        }
    }

    /// Live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Option<Envelope> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    async fn set(&self, key: &str, value: Envelope, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.max_keys {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_keys
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone())
            {
                tracing::debug!(key = %oldest, "Evicting cache entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    async fn del(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn flush(&self) {
        self.entries.write().await.clear();
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        self.entries.write().await.retain(|key, _| !key.starts_with(prefix));
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Prefix shared by every key of a section.
#[must_use]
pub fn section_prefix(section: &str) -> String {
    format!("{section}:")
}

/// Deterministic key for a read.
#[must_use]
pub fn cache_key(
    section: &str,
    action: ActionKind,
    params: &BTreeMap<String, String>,
    query: &[(String, String)],
    body: &Map<String, Value>,
    relations: &[String],
) -> String {
    let params: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let query: Vec<Value> = query
        .iter()
        .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), Value::String(v.clone())]))
        .collect();

    let mut payload = Map::new();
    payload.insert("p".to_string(), Value::Object(params));
    payload.insert("q".to_string(), Value::Array(query));
    payload.insert("b".to_string(), Value::Object(body.clone()));
    payload.insert(
        "r".to_string(),
        Value::Array(relations.iter().cloned().map(Value::String).collect()),
    );

    let mut key = format!("{section}:{action}:");
    write_canonical(&mut key, &Value::Object(payload));
    key
}

/// JSON with object keys sorted at every level.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
