use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::PgPool;

use super::EntityCache;
use crate::errors::CacheError;
use crate::snapshot::{self, SnapshotReport};
use crate::sync::SyncedEntity;
use crate::types::Charge;

const PREFIX: &str = "ch";

pub fn cache_key(
    organization_id: &str,
    plan_id: &str,
    billable_metric_id: &str,
    id: &str,
) -> String {
    format!("{PREFIX}:{organization_id}:{plan_id}:{billable_metric_id}:{id}")
}

pub fn search_prefix(organization_id: &str, plan_id: &str, billable_metric_id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{plan_id}:{billable_metric_id}:")
}

impl EntityCache {
    pub async fn set_charge(&self, charge: &Charge) -> Result<(), CacheError> {
        self.set_json(
            cache_key(
                &charge.organization_id,
                &charge.plan_id,
                &charge.billable_metric_id,
                &charge.id,
            ),
            charge,
        )
        .await
    }

    pub async fn charge(
        &self,
        organization_id: &str,
        plan_id: &str,
        billable_metric_id: &str,
        id: &str,
    ) -> Result<Charge, CacheError> {
        self.get_json(cache_key(organization_id, plan_id, billable_metric_id, id))
            .await
    }

    pub async fn search_charges(
        &self,
        organization_id: &str,
        plan_id: &str,
        billable_metric_id: &str,
    ) -> Result<Vec<Charge>, CacheError> {
        self.search_json(search_prefix(organization_id, plan_id, billable_metric_id))
            .await
    }

    pub async fn delete_charge(&self, charge: &Charge) -> Result<(), CacheError> {
        self.remove(cache_key(
            &charge.organization_id,
            &charge.plan_id,
            &charge.billable_metric_id,
            &charge.id,
        ))
        .await
    }

    pub async fn load_charges_snapshot(
        &self,
        pool: &PgPool,
    ) -> Result<SnapshotReport, sqlx::Error> {
        snapshot::load_snapshot(self, Charge::MODEL, fetch_all(pool), |charge| {
            cache_key(
                &charge.organization_id,
                &charge.plan_id,
                &charge.billable_metric_id,
                &charge.id,
            )
        })
        .await
    }
}

fn fetch_all(pool: &PgPool) -> BoxStream<'_, Result<Charge, sqlx::Error>> {
    sqlx::query_as::<_, Charge>(
        "SELECT id, organization_id, plan_id, billable_metric_id, pay_in_advance, \
                properties->'pricing_group_keys' AS pricing_group_keys, \
                created_at::timestamptz AS created_at, \
                updated_at::timestamptz AS updated_at, \
                deleted_at::timestamptz AS deleted_at \
         FROM charges WHERE deleted_at IS NULL",
    )
    .fetch(pool)
}

#[async_trait]
impl SyncedEntity for Charge {
    const MODEL: &'static str = "charges";
    const TABLE: &'static str = "charges";

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
        cache_key(
            &self.organization_id,
            &self.plan_id,
            &self.billable_metric_id,
            &self.id,
        )
    }

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError> {
        cache
            .charge(
                &self.organization_id,
                &self.plan_id,
                &self.billable_metric_id,
                &self.id,
            )
            .await
    }

    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.set_charge(self).await
    }

    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.delete_charge(self).await
    }
}
