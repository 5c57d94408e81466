use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::PgPool;

use super::EntityCache;
use crate::errors::CacheError;
use crate::snapshot::{self, SnapshotReport};
use crate::sync::SyncedEntity;
use crate::types::ChargeFilter;

const PREFIX: &str = "cf";

pub fn cache_key(organization_id: &str, charge_id: &str, id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{charge_id}:{id}")
}

pub fn search_prefix(organization_id: &str, charge_id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{charge_id}:")
}

impl EntityCache {
    pub async fn set_charge_filter(&self, filter: &ChargeFilter) -> Result<(), CacheError> {
        self.set_json(
            cache_key(&filter.organization_id, &filter.charge_id, &filter.id),
            filter,
        )
        .await
    }

    pub async fn charge_filter(
        &self,
        organization_id: &str,
        charge_id: &str,
        id: &str,
    ) -> Result<ChargeFilter, CacheError> {
        self.get_json(cache_key(organization_id, charge_id, id)).await
    }

    pub async fn search_charge_filters(
        &self,
        organization_id: &str,
        charge_id: &str,
    ) -> Result<Vec<ChargeFilter>, CacheError> {
        self.search_json(search_prefix(organization_id, charge_id))
            .await
    }

    pub async fn delete_charge_filter(&self, filter: &ChargeFilter) -> Result<(), CacheError> {
        self.remove(cache_key(
            &filter.organization_id,
            &filter.charge_id,
            &filter.id,
        ))
        .await
    }

    pub async fn load_charge_filters_snapshot(
        &self,
        pool: &PgPool,
    ) -> Result<SnapshotReport, sqlx::Error> {
        snapshot::load_snapshot(self, ChargeFilter::MODEL, fetch_all(pool), |filter| {
            cache_key(&filter.organization_id, &filter.charge_id, &filter.id)
        })
        .await
    }
}

fn fetch_all(pool: &PgPool) -> BoxStream<'_, Result<ChargeFilter, sqlx::Error>> {
    sqlx::query_as::<_, ChargeFilter>(
        "SELECT id, organization_id, charge_id, \
                properties->'pricing_group_keys' AS pricing_group_keys, \
                created_at::timestamptz AS created_at, \
                updated_at::timestamptz AS updated_at, \
                deleted_at::timestamptz AS deleted_at \
         FROM charge_filters WHERE deleted_at IS NULL",
    )
    .fetch(pool)
}

#[async_trait]
impl SyncedEntity for ChargeFilter {
    const MODEL: &'static str = "charge_filters";
    const TABLE: &'static str = "charge_filters";

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
        cache_key(&self.organization_id, &self.charge_id, &self.id)
    }

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError> {
        cache
            .charge_filter(&self.organization_id, &self.charge_id, &self.id)
            .await
    }

    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.set_charge_filter(self).await
    }

    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.delete_charge_filter(self).await
    }
}
