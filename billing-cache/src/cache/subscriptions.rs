use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::PgPool;

use super::EntityCache;
use crate::errors::CacheError;
use crate::snapshot::{self, SnapshotReport};
use crate::sync::SyncedEntity;
use crate::types::Subscription;

const PREFIX: &str = "sub";

// Events reference subscriptions by external id, so that is the key; the
// row id only participates in the delete identity check.
pub fn cache_key(organization_id: &str, external_id: &str) -> String {
    format!("{PREFIX}:{organization_id}:{external_id}")
}

impl EntityCache {
    pub async fn set_subscription(&self, subscription: &Subscription) -> Result<(), CacheError> {
        self.set_json(
            cache_key(&subscription.organization_id, &subscription.external_id),
            subscription,
        )
        .await
    }

    pub async fn subscription(
        &self,
        organization_id: &str,
        external_id: &str,
    ) -> Result<Subscription, CacheError> {
        self.get_json(cache_key(organization_id, external_id)).await
    }

    pub async fn delete_subscription(&self, subscription: &Subscription) -> Result<(), CacheError> {
        self.remove(cache_key(
            &subscription.organization_id,
            &subscription.external_id,
        ))
        .await
    }

    pub async fn load_subscriptions_snapshot(
        &self,
        pool: &PgPool,
    ) -> Result<SnapshotReport, sqlx::Error> {
        snapshot::load_snapshot(self, Subscription::MODEL, fetch_all(pool), |subscription| {
            cache_key(&subscription.organization_id, &subscription.external_id)
        })
        .await
    }
}

fn fetch_all(pool: &PgPool) -> BoxStream<'_, Result<Subscription, sqlx::Error>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT subscriptions.id, customers.organization_id, subscriptions.external_id, \
                subscriptions.plan_id, \
                subscriptions.started_at::timestamptz AS started_at, \
                subscriptions.terminated_at::timestamptz AS terminated_at, \
                subscriptions.created_at::timestamptz AS created_at, \
                subscriptions.updated_at::timestamptz AS updated_at \
         FROM subscriptions \
         INNER JOIN customers ON customers.id = subscriptions.customer_id \
         WHERE subscriptions.terminated_at IS NULL",
    )
    .fetch(pool)
}

#[async_trait]
impl SyncedEntity for Subscription {
    const MODEL: &'static str = "subscriptions";
    const TABLE: &'static str = "subscriptions";

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.terminated_at.is_some()
    }

    fn cache_key(&self) -> String {
        cache_key(&self.organization_id, &self.external_id)
    }

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError> {
        cache
            .subscription(&self.organization_id, &self.external_id)
            .await
    }

    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.set_subscription(self).await
    }

    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError> {
        cache.delete_subscription(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common_kvstore::MemoryKvClient;

    use super::*;
    use crate::sync::{apply_change, SyncOutcome};

    fn subscription(id: &str, external_id: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            organization_id: "org1".to_string(),
            external_id: external_id.to_string(),
            plan_id: "plan1".to_string(),
            started_at: Some("2025-01-01T00:00:00Z".parse().unwrap()),
            terminated_at: None,
            created_at: None,
            updated_at: "2025-03-06T12:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("org1", "ext1"), "sub:org1:ext1");
    }

    #[tokio::test]
    async fn test_set_then_get_subscription() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        let subscription = subscription("sub1", "ext1");

        cache.set_subscription(&subscription).await.unwrap();

        let cached = cache.subscription("org1", "ext1").await.unwrap();
        assert_eq!(cached, subscription);
    }

    #[tokio::test]
    async fn test_termination_only_deletes_the_current_owner() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        // "ext1" now belongs to a newer subscription row
        cache
            .set_subscription(&subscription("sub2", "ext1"))
            .await
            .unwrap();

        let mut terminated = subscription("sub1", "ext1");
        terminated.terminated_at = Some("2025-03-07T00:00:00Z".parse().unwrap());
        let outcome = apply_change(&cache, terminated).await.unwrap();

        assert_eq!(outcome, SyncOutcome::SkippedIdMismatch);
        assert_eq!(cache.subscription("org1", "ext1").await.unwrap().id, "sub2");
    }
}
