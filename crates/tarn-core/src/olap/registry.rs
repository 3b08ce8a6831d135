//! Explicit registry of open engines keyed by destination identity.
//!
//! Callers own the registry and pass it where it is needed. Entries are
//! evicted once they have sat idle past a TTL and nobody else holds them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::info;

use super::OlapEngine;

struct Entry<T> {
    value: Arc<T>,
    last_used: Instant,
}

pub struct PoolRegistry<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
}

pub type EngineRegistry = PoolRegistry<OlapEngine>;

impl<T> Default for PoolRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PoolRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up `key`, refreshing its idle timer.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.value))
    }

    /// Insert `value` unless another caller got there first, in which case
    /// the existing entry wins and is returned.
    pub fn insert(&self, key: &str, value: Arc<T>) -> Arc<T> {
        let mut entries = self.lock();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value,
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Arc::clone(&entry.value)
    }

    /// Return the entry for `key`, opening it with `open` when absent. The
    /// registry lock is not held while `open` runs.
    pub async fn get_or_open<F, Fut, E>(&self, key: &str, open: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let value = Arc::new(open().await?);
        Ok(self.insert(key, value))
    }

    /// Drop entries idle for longer than `ttl` that are not referenced
    /// outside the registry. Returns the evicted keys.
    pub fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| {
                Arc::strong_count(&e.value) == 1 && now.duration_since(e.last_used) > ttl
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
            info!("Evicted idle pool {}", key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_once_per_key() {
        let registry: PoolRegistry<String> = PoolRegistry::new();
        let a = registry
            .get_or_open("a", || async { Ok::<_, ()>("first".to_string()) })
            .await
            .unwrap();
        let again = registry
            .get_or_open("a", || async { Ok::<_, ()>("second".to_string()) })
            .await
            .unwrap();
        assert_eq!(*again, "first");
        assert!(Arc::ptr_eq(&a, &again));

        let failed = registry
            .get_or_open("b", || async { Err::<String, _>("boom") })
            .await;
        assert_eq!(failed.unwrap_err(), "boom");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn evicts_only_idle_unreferenced_entries() {
        let registry: PoolRegistry<u32> = PoolRegistry::new();
        let held = registry.insert("held", Arc::new(1));
        registry.insert("idle", Arc::new(2));

        std::thread::sleep(Duration::from_millis(20));
        let evicted = registry.evict_idle(Duration::from_millis(5));
        assert_eq!(evicted, vec!["idle".to_string()]);
        assert_eq!(registry.len(), 1);

        drop(held);
        assert!(registry.evict_idle(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.evict_idle(Duration::ZERO), vec!["held".to_string()]);
        assert!(registry.is_empty());
    }
}
