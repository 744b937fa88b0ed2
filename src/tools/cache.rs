use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Tool result cache keyed by a canonical form of `(tool, inputs, tenant)`.
/// `serde_json` maps serialize with sorted keys, so equal inputs produce
/// equal keys regardless of insertion order.
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

pub fn cache_key(tool_name: &str, inputs: &Map<String, Value>, tenant_id: &str) -> String {
    // Round-trip through BTreeMap-backed Value for a canonical ordering.
    let canonical = serde_json::to_string(&Value::Object(inputs.clone())).unwrap_or_default();
    format!("{tool_name}\u{1}{tenant_id}\u{1}{canonical}")
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() > entry.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn put(&self, key: String, value: Value, ttl: Option<Duration>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Drops expired entries; returns how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() <= entry.ttl);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn key_is_order_insensitive() {
        let a = inputs(&[("zone", json!("a")), ("limit", json!(10))]);
        let b = inputs(&[("limit", json!(10)), ("zone", json!("a"))]);
        assert_eq!(cache_key("ci", &a, "t1"), cache_key("ci", &b, "t1"));
    }

    #[test]
    fn key_separates_tenants() {
        let params = inputs(&[("zone", json!("a"))]);
        assert_ne!(cache_key("ci", &params, "t1"), cache_key("ci", &params, "t2"));
    }

    #[tokio::test]
    async fn hit_within_ttl_miss_after() {
        let cache = ResultCache::new(Duration::from_millis(30));
        let key = cache_key("ci", &Map::new(), "t1");
        cache.put(key.clone(), json!({"rows": []}), None).await;

        assert!(cache.get(&key).await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.evict_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn per_entry_ttl_overrides_default() {
        let cache = ResultCache::new(Duration::from_millis(5));
        let key = cache_key("ci", &Map::new(), "t1");
        cache
            .put(key.clone(), json!(1), Some(Duration::from_secs(60)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&key).await.is_some());
    }
}
