use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::PgPool;

use super::EntityCache;
use crate::errors::CacheError;
use crate::snapshot::{self, SnapshotReport};
use crate::sync::SyncedEntity;
use crate::types::BillableMetricFilter;

const PREFIX: &str = "bmf";

pub fn cache_key(organization_id: &str, billable_metric_id: &str, id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{billable_metric_id}:{id}")
}

pub fn search_prefix(organization_id: &str, billable_metric_id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{billable_metric_id}:")
}

impl EntityCache {
    pub async fn set_billable_metric_filter(
        &self,
        filter: &BillableMetricFilter,
    ) -> Result<(), CacheError> {
        self.set_json(
            cache_key(&filter.organization_id, &filter.billable_metric_id, &filter.id),
            filter,
        )
        .await
    }

    pub async fn billable_metric_filter(
        &self,
        organization_id: &str,
        billable_metric_id: &str,
        id: &str,
    ) -> Result<BillableMetricFilter, CacheError> {
        self.get_json(cache_key(organization_id, billable_metric_id, id))
            .await
    }

    pub async fn search_billable_metric_filters(
        &self,
        organization_id: &str,
        billable_metric_id: &str,
    ) -> Result<Vec<BillableMetricFilter>, CacheError> {
        self.search_json(search_prefix(organization_id, billable_metric_id))
            .await
    }

    pub async fn delete_billable_metric_filter(
        &self,
        filter: &BillableMetricFilter,
    ) -> Result<(), CacheError> {
        self.remove(cache_key(
            &filter.organization_id,
            &filter.billable_metric_id,
            &filter.id,
        ))
        .await
    }

    pub async fn load_billable_metric_filters_snapshot(
        &self,
        pool: &PgPool,
    ) -> Result<SnapshotReport, sqlx::Error> {
        snapshot::load_snapshot(self, BillableMetricFilter::MODEL, fetch_all(pool), |filter| {
            cache_key(&filter.organization_id, &filter.billable_metric_id, &filter.id)
        })
        .await
    }
}

fn fetch_all(pool: &PgPool) -> BoxStream<'_, Result<BillableMetricFilter, sqlx::Error>> {
    sqlx::query_as::<_, BillableMetricFilter>(
        "SELECT id, organization_id, billable_metric_id, key, values, \
                created_at::timestamptz AS created_at, \
                updated_at::timestamptz AS updated_at, \
                deleted_at::timestamptz AS deleted_at \
         FROM billable_metric_filters WHERE deleted_at IS NULL",
    )
    .fetch(pool)
}

#[async_trait]
impl SyncedEntity for BillableMetricFilter {
    const MODEL: &'static str = "billable_metric_filters";
    const TABLE: &'static str = "billable_metric_filters";

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
        cache_key(&self.organization_id, &self.billable_metric_id, &self.id)
    }

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError> {
        cache
            .billable_metric_filter(&self.organization_id, &self.billable_metric_id, &self.id)
            .await
    }

    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.set_billable_metric_filter(self).await
    }

    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.delete_billable_metric_filter(self).await
    }
}
