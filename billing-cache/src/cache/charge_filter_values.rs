use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::PgPool;

use super::EntityCache;
use crate::errors::CacheError;
use crate::snapshot::{self, SnapshotReport};
use crate::sync::SyncedEntity;
use crate::types::ChargeFilterValue;

const PREFIX: &str = "cfv";

pub fn cache_key(organization_id: &str, charge_filter_id: &str, id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{charge_filter_id}:{id}")
}

pub fn search_prefix(organization_id: &str, charge_filter_id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{charge_filter_id}:")
}

impl EntityCache {
    pub async fn set_charge_filter_value(
        &self,
        value: &ChargeFilterValue,
    ) -> Result<(), CacheError> {
        self.set_json(
            cache_key(&value.organization_id, &value.charge_filter_id, &value.id),
            value,
        )
        .await
    }

    pub async fn charge_filter_value(
        &self,
        organization_id: &str,
        charge_filter_id: &str,
        id: &str,
    ) -> Result<ChargeFilterValue, CacheError> {
        self.get_json(cache_key(organization_id, charge_filter_id, id))
            .await
    }

    pub async fn search_charge_filter_values(
        &self,
        organization_id: &str,
        charge_filter_id: &str,
    ) -> Result<Vec<ChargeFilterValue>, CacheError> {
        self.search_json(search_prefix(organization_id, charge_filter_id))
            .await
    }

    pub async fn delete_charge_filter_value(
        &self,
        value: &ChargeFilterValue,
    ) -> Result<(), CacheError> {
        self.remove(cache_key(
            &value.organization_id,
            &value.charge_filter_id,
            &value.id,
        ))
        .await
    }

    pub async fn load_charge_filter_values_snapshot(
        &self,
        pool: &PgPool,
    ) -> Result<SnapshotReport, sqlx::Error> {
        snapshot::load_snapshot(self, ChargeFilterValue::MODEL, fetch_all(pool), |value| {
            cache_key(&value.organization_id, &value.charge_filter_id, &value.id)
        })
        .await
    }
}

fn fetch_all(pool: &PgPool) -> BoxStream<'_, Result<ChargeFilterValue, sqlx::Error>> {
    sqlx::query_as::<_, ChargeFilterValue>(
        "SELECT id, organization_id, charge_filter_id, billable_metric_filter_id, values, \
                created_at::timestamptz AS created_at, \
                updated_at::timestamptz AS updated_at, \
                deleted_at::timestamptz AS deleted_at \
         FROM charge_filter_values WHERE deleted_at IS NULL",
    )
    .fetch(pool)
}

#[async_trait]
impl SyncedEntity for ChargeFilterValue {
    const MODEL: &'static str = "charge_filter_values";
    const TABLE: &'static str = "charge_filter_values";

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
        cache_key(&self.organization_id, &self.charge_filter_id, &self.id)
    }

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError> {
        cache
            .charge_filter_value(&self.organization_id, &self.charge_filter_id, &self.id)
            .await
    }

    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.set_charge_filter_value(self).await
    }

    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.delete_charge_filter_value(self).await
    }
}
