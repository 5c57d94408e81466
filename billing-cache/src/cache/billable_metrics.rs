use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::PgPool;

use super::EntityCache;
use crate::errors::CacheError;
use crate::snapshot::{self, SnapshotReport};
use crate::sync::SyncedEntity;
use crate::types::BillableMetric;

const PREFIX: &str = "bm";

// Metrics are looked up by (organization, code), so the code is the key's
// most specific component, not the row id.
pub fn cache_key(organization_id: &str, code: &str) -> String {
    format!("{PREFIX}:{organization_id}:{code}")
}

impl EntityCache {
    pub async fn set_billable_metric(&self, metric: &BillableMetric) -> Result<(), CacheError> {
        self.set_json(cache_key(&metric.organization_id, &metric.code), metric)
            .await
    }

    pub async fn billable_metric(
        &self,
        organization_id: &str,
        code: &str,
    ) -> Result<BillableMetric, CacheError> {
        self.get_json(cache_key(organization_id, code)).await
    }

    pub async fn delete_billable_metric(&self, metric: &BillableMetric) -> Result<(), CacheError> {
        self.remove(cache_key(&metric.organization_id, &metric.code))
            .await
    }

    pub async fn load_billable_metrics_snapshot(
        &self,
        pool: &PgPool,
    ) -> Result<SnapshotReport, sqlx::Error> {
        snapshot::load_snapshot(self, BillableMetric::MODEL, fetch_all(pool), |metric| {
            cache_key(&metric.organization_id, &metric.code)
        })
        .await
    }
}

fn fetch_all(pool: &PgPool) -> BoxStream<'_, Result<BillableMetric, sqlx::Error>> {
    sqlx::query_as::<_, BillableMetric>(
        "SELECT id, organization_id, code, aggregation_type, field_name, expression, \
                created_at::timestamptz AS created_at, \
                updated_at::timestamptz AS updated_at, \
                deleted_at::timestamptz AS deleted_at \
         FROM billable_metrics WHERE deleted_at IS NULL",
    )
    .fetch(pool)
}

#[async_trait]
impl SyncedEntity for BillableMetric {
    const MODEL: &'static str = "billable_metrics";
    const TABLE: &'static str = "billable_metrics";

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn cache_key(&self) -> String {
        cache_key(&self.organization_id, &self.code)
    }

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError> {
        cache.billable_metric(&self.organization_id, &self.code).await
    }

    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.set_billable_metric(self).await
    }

    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.delete_billable_metric(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common_kvstore::MemoryKvClient;

    use super::*;
    use crate::types::AggregationType;

    fn metric(organization_id: &str, code: &str) -> BillableMetric {
        BillableMetric {
            id: format!("{organization_id}-{code}"),
            organization_id: organization_id.to_string(),
            code: code.to_string(),
            aggregation_type: AggregationType::Count,
            field_name: None,
            expression: None,
            created_at: None,
            updated_at: "2025-03-06T12:00:00Z".parse().unwrap(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("org1", "api_calls"), "bm:org1:api_calls");
    }

    #[tokio::test]
    async fn test_set_then_get_billable_metric() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        let metric = metric("org1", "api_calls");

        cache.set_billable_metric(&metric).await.unwrap();

        let cached = cache.billable_metric("org1", "api_calls").await.unwrap();
        assert_eq!(cached, metric);
    }

    #[tokio::test]
    async fn test_get_unknown_billable_metric_is_not_found() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));

        let err = cache.billable_metric("org1", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_billable_metric() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        let metric = metric("org1", "api_calls");
        cache.set_billable_metric(&metric).await.unwrap();

        cache.delete_billable_metric(&metric).await.unwrap();

        assert!(cache
            .billable_metric("org1", "api_calls")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
