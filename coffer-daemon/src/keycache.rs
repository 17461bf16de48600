//! In-memory authentication key table.
//!
//! Keys live here between unlock and relock; they are never persisted and
//! are wiped on eviction. Standalone entries are keyed by hashed secret name,
//! matching the cache's consumers.

use std::collections::HashMap;

use coffer_core::SecretKey;
use tokio::task::JoinHandle;

/// Handle to a pending relock; aborting the task disarms the timer.
pub struct RelockTimer {
    handle: JoinHandle<()>,
}

impl RelockTimer {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for RelockTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Default)]
pub struct KeyCache {
    collection_keys: HashMap<String, SecretKey>,
    standalone_keys: HashMap<String, SecretKey>,
    collection_timers: HashMap<String, RelockTimer>,
    standalone_timers: HashMap<String, RelockTimer>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_key(&self, collection_name: &str) -> Option<&SecretKey> {
        self.collection_keys.get(collection_name)
    }

    pub fn insert_collection_key(&mut self, collection_name: impl Into<String>, key: SecretKey) {
        self.collection_keys.insert(collection_name.into(), key);
    }

    pub fn standalone_key(&self, hashed_secret_name: &str) -> Option<&SecretKey> {
        self.standalone_keys.get(hashed_secret_name)
    }

    pub fn insert_standalone_key(
        &mut self,
        hashed_secret_name: impl Into<String>,
        key: SecretKey,
    ) {
        self.standalone_keys.insert(hashed_secret_name.into(), key);
    }

    pub fn has_collection_timer(&self, collection_name: &str) -> bool {
        self.collection_timers.contains_key(collection_name)
    }

    pub fn arm_collection_timer(&mut self, collection_name: impl Into<String>, timer: RelockTimer) {
        self.collection_timers.insert(collection_name.into(), timer);
    }

    pub fn has_standalone_timer(&self, hashed_secret_name: &str) -> bool {
        self.standalone_timers.contains_key(hashed_secret_name)
    }

    pub fn arm_standalone_timer(
        &mut self,
        hashed_secret_name: impl Into<String>,
        timer: RelockTimer,
    ) {
        self.standalone_timers
            .insert(hashed_secret_name.into(), timer);
    }

    /// Drop the key and any timer for a collection. `SecretKey` zeroises its
    /// material on drop.
    pub fn evict_collection(&mut self, collection_name: &str) {
        self.collection_keys.remove(collection_name);
        self.collection_timers.remove(collection_name);
    }

    pub fn evict_standalone(&mut self, hashed_secret_name: &str) {
        self.standalone_keys.remove(hashed_secret_name);
        self.standalone_timers.remove(hashed_secret_name);
    }

    /// Daemon-wide relock entry point, driven by an external device-lock
    /// observer.
    pub fn evict_all(&mut self) {
        self.collection_keys.clear();
        self.standalone_keys.clear();
        self.collection_timers.clear();
        self.standalone_timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> SecretKey {
        SecretKey::from(bytes)
    }

    #[test]
    fn insert_lookup_evict() {
        let mut cache = KeyCache::new();
        cache.insert_collection_key("kv", key(b"a"));
        cache.insert_standalone_key("hashed", key(b"b"));

        assert_eq!(cache.collection_key("kv").unwrap().as_bytes(), b"a");
        assert_eq!(cache.standalone_key("hashed").unwrap().as_bytes(), b"b");

        cache.evict_collection("kv");
        cache.evict_standalone("hashed");
        assert!(cache.collection_key("kv").is_none());
        assert!(cache.standalone_key("hashed").is_none());
    }

    #[tokio::test]
    async fn evicting_disarms_the_timer() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let mut cache = KeyCache::new();
        cache.insert_collection_key("kv", key(b"a"));
        cache.arm_collection_timer(
            "kv",
            RelockTimer::new(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                let _ = tx.send(());
            })),
        );
        assert!(cache.has_collection_timer("kv"));

        cache.evict_collection("kv");
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err(), "aborted timer must not fire");
    }

    #[tokio::test]
    async fn evict_all_clears_both_tables() {
        let mut cache = KeyCache::new();
        cache.insert_collection_key("kv", key(b"a"));
        cache.insert_standalone_key("hashed", key(b"b"));
        cache.evict_all();
        assert!(cache.collection_key("kv").is_none());
        assert!(cache.standalone_key("hashed").is_none());
    }
}
