use std::sync::Arc;

use common_kvstore::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::CacheError;

pub mod billable_metric_filters;
pub mod billable_metrics;
pub mod charge_filter_values;
pub mod charge_filters;
pub mod charges;
pub mod subscriptions;

/// JSON-encoded CRUD for the mirrored entities, on top of the key/value
/// store. Entity scoping lives entirely in the composite keys built by the
/// per-entity modules: keys are ordered least- to most-specific so that a
/// prefix scan returns exactly the children of a parent scope.
#[derive(Clone)]
pub struct EntityCache {
    store: Arc<dyn Client>,
}

impl EntityCache {
    pub fn new(store: Arc<dyn Client>) -> Self {
        Self { store }
    }

    pub(crate) fn store(&self) -> &Arc<dyn Client> {
        &self.store
    }

    pub(crate) async fn set_json<T: Serialize>(
        &self,
        key: String,
        value: &T,
    ) -> Result<(), CacheError> {
        let data = serde_json::to_string(value)?;
        self.store.set(key, data).await?;
        Ok(())
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, key: String) -> Result<T, CacheError> {
        let data = self.store.get(key).await?;
        Ok(serde_json::from_str(&data)?)
    }

    pub(crate) async fn search_json<T: DeserializeOwned>(
        &self,
        prefix: String,
    ) -> Result<Vec<T>, CacheError> {
        let raw = self.store.scan_prefix(prefix).await?;
        raw.iter()
            .map(|data| serde_json::from_str(data).map_err(CacheError::from))
            .collect()
    }

    pub(crate) async fn remove(&self, key: String) -> Result<(), CacheError> {
        self.store.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common_kvstore::MemoryKvClient;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        id: String,
    }

    fn memory_cache() -> EntityCache {
        EntityCache::new(Arc::new(MemoryKvClient::new()))
    }

    #[tokio::test]
    async fn test_set_then_get_json_roundtrip() {
        let cache = memory_cache();
        let doc = Doc {
            id: "1".to_string(),
        };

        cache.set_json("doc:1".to_string(), &doc).await.unwrap();

        assert_eq!(cache.get_json::<Doc>("doc:1".to_string()).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn test_get_json_miss_is_not_found() {
        let cache = memory_cache();

        let err = cache.get_json::<Doc>("doc:1".to_string()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_json_reports_malformed_stored_value() {
        let cache = memory_cache();
        cache
            .store()
            .set("doc:1".to_string(), "{broken".to_string())
            .await
            .unwrap();

        let err = cache.get_json::<Doc>("doc:1".to_string()).await.unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[tokio::test]
    async fn test_search_json_is_scoped_by_prefix() {
        let cache = memory_cache();
        for id in ["a", "b"] {
            cache
                .set_json(
                    format!("bm:org-1:{id}"),
                    &Doc {
                        id: id.to_string(),
                    },
                )
                .await
                .unwrap();
        }
        cache
            .set_json(
                "bm:org-2:c".to_string(),
                &Doc {
                    id: "c".to_string(),
                },
            )
            .await
            .unwrap();

        let docs: Vec<Doc> = cache.search_json("bm:org-1:".to_string()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|doc| doc.id == "a" || doc.id == "b"));
    }

    #[tokio::test]
    async fn test_search_json_fails_on_a_malformed_match() {
        let cache = memory_cache();
        cache
            .set_json(
                "doc:1".to_string(),
                &Doc {
                    id: "1".to_string(),
                },
            )
            .await
            .unwrap();
        cache
            .store()
            .set("doc:2".to_string(), "{broken".to_string())
            .await
            .unwrap();

        let result = cache.search_json::<Doc>("doc:".to_string()).await;
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[tokio::test]
    async fn test_search_json_without_matches_is_empty() {
        let cache = memory_cache();

        let docs: Vec<Doc> = cache.search_json("doc:".to_string()).await.unwrap();
        assert!(docs.is_empty());
    }
}
