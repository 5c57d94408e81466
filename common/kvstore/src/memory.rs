use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{Client, KvError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

struct Store {
    entries: BTreeMap<String, Entry>,
    closed: bool,
}

/// In-memory key/value engine backed by an ordered map.
///
/// State intentionally does not survive a restart: the cache built on top is
/// a projection of the source tables and is rebuilt from a snapshot on every
/// process start. Expired entries are skipped on read and replaced on write;
/// they are not swept eagerly.
pub struct MemoryKvClient {
    inner: RwLock<Store>,
}

impl MemoryKvClient {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Store {
                entries: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Store> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Store> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryKvClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Client for MemoryKvClient {
    async fn get(&self, key: String) -> Result<String, KvError> {
        let store = self.read();
        if store.closed {
            return Err(KvError::Closed);
        }

        match store.entries.get(&key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(entry.value.clone()),
            _ => Err(KvError::NotFound),
        }
    }

    async fn set(&self, key: String, value: String) -> Result<(), KvError> {
        let mut store = self.write();
        if store.closed {
            return Err(KvError::Closed);
        }

        store.entries.insert(
            key,
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut store = self.write();
        if store.closed {
            return Err(KvError::Closed);
        }

        store.entries.insert(
            key,
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: String) -> Result<(), KvError> {
        let mut store = self.write();
        if store.closed {
            return Err(KvError::Closed);
        }

        store.entries.remove(&key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: String) -> Result<Vec<String>, KvError> {
        let store = self.read();
        if store.closed {
            return Err(KvError::Closed);
        }

        let now = Instant::now();
        Ok(store
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value.clone())
            .collect())
    }

    async fn close(&self) -> Result<(), KvError> {
        let mut store = self.write();
        store.entries.clear();
        store.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let store = MemoryKvClient::new();

        store
            .set("key1".to_string(), "value1".to_string())
            .await
            .unwrap();

        assert_eq!(store.get("key1".to_string()).await.unwrap(), "value1");
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let store = MemoryKvClient::new();

        assert_eq!(
            store.get("missing".to_string()).await,
            Err(KvError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_value() {
        let store = MemoryKvClient::new();

        store.set("key".to_string(), "old".to_string()).await.unwrap();
        store.set("key".to_string(), "new".to_string()).await.unwrap();

        assert_eq!(store.get("key".to_string()).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_del_is_idempotent() {
        let store = MemoryKvClient::new();

        store.set("key".to_string(), "value".to_string()).await.unwrap();
        store.del("key".to_string()).await.unwrap();
        store.del("key".to_string()).await.unwrap();

        assert_eq!(store.get("key".to_string()).await, Err(KvError::NotFound));
    }

    #[tokio::test]
    async fn test_scan_prefix_returns_only_matching_keys_in_order() {
        let store = MemoryKvClient::new();

        store.set("bm:org-1:b".to_string(), "2".to_string()).await.unwrap();
        store.set("bm:org-1:a".to_string(), "1".to_string()).await.unwrap();
        store.set("bm:org-2:c".to_string(), "3".to_string()).await.unwrap();

        let values = store.scan_prefix("bm:org-1:".to_string()).await.unwrap();
        assert_eq!(values, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_prefix_without_matches_is_empty() {
        let store = MemoryKvClient::new();

        store.set("other".to_string(), "1".to_string()).await.unwrap();

        let values = store.scan_prefix("bm:".to_string()).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_set_with_expiry_keeps_value_until_deadline() {
        let store = MemoryKvClient::new();

        store
            .set_with_expiry(
                "key".to_string(),
                "value".to_string(),
                Duration::from_millis(40),
            )
            .await
            .unwrap();

        assert_eq!(store.get("key".to_string()).await.unwrap(), "value");

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("key".to_string()).await, Err(KvError::NotFound));
        assert!(store.scan_prefix("key".to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_clears_previous_expiry() {
        let store = MemoryKvClient::new();

        store
            .set_with_expiry(
                "key".to_string(),
                "doomed".to_string(),
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        store.set("key".to_string(), "kept".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("key".to_string()).await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_operations_after_close_report_closed() {
        let store = MemoryKvClient::new();

        store.set("key".to_string(), "value".to_string()).await.unwrap();
        store.close().await.unwrap();

        assert_eq!(store.get("key".to_string()).await, Err(KvError::Closed));
        assert_eq!(
            store.set("key".to_string(), "value".to_string()).await,
            Err(KvError::Closed)
        );
        assert_eq!(store.del("key".to_string()).await, Err(KvError::Closed));
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers_on_disjoint_keys() {
        let store = Arc::new(MemoryKvClient::new());

        let mut handles = Vec::new();
        for task in 0..12 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("task-{task}:key-{i}");
                    store.set(key.clone(), format!("{task}-{i}")).await.unwrap();
                    assert_eq!(store.get(key).await.unwrap(), format!("{task}-{i}"));
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        for task in 0..12 {
            let values = store
                .scan_prefix(format!("task-{task}:"))
                .await
                .unwrap();
            assert_eq!(values.len(), 100);
        }
    }
}
