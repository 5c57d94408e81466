use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_kafka::{CdcConsumer, KafkaConfig, RecvErr};
use rdkafka::error::KafkaError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::EntityCache;
use crate::errors::CacheError;
use crate::metrics_consts::{
    CDC_DECODE_ERRORS, CDC_EMPTY_RECORDS, CDC_FETCH_ERRORS, CDC_RECORDS_APPLIED,
    CDC_RECORDS_RECEIVED, CDC_WRITE_FAILURES,
};

/// One mirrored entity kind, as seen by the generic synchronizer: its stream
/// identity plus the handful of per-kind operations the apply algorithm
/// needs. One implementation per cached entity.
#[async_trait]
pub trait SyncedEntity:
    DeserializeOwned + Serialize + Send + Sync + Sized + 'static
{
    const MODEL: &'static str;
    const TABLE: &'static str;

    fn id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
    fn cache_key(&self) -> String;

    async fn lookup(&self, cache: &EntityCache) -> Result<Self, CacheError>;
    async fn upsert(&self, cache: &EntityCache) -> Result<(), CacheError>;
    async fn remove_cached(&self, cache: &EntityCache) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Upserted,
    Deleted,
    /// The cached copy is at least as fresh as the incoming one.
    SkippedStale,
    /// Delete for a key that holds nothing.
    SkippedMissing,
    /// Delete for a key whose current owner is a different row.
    SkippedIdMismatch,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Upserted => "upserted",
            SyncOutcome::Deleted => "deleted",
            SyncOutcome::SkippedStale => "skipped_stale",
            SyncOutcome::SkippedMissing => "skipped_missing",
            SyncOutcome::SkippedIdMismatch => "skipped_id_mismatch",
        }
    }
}

/// Apply one decoded change event to the cache.
///
/// Deletes only remove the key when the cached row's identity matches the
/// incoming one, so a reused composite key never loses its new owner to a
/// stale tombstone. Upserts are last-write-wins on `updated_at`, with ties
/// kept by the cached copy; this is sound because records of one entity
/// kind are applied in delivery order by a single task.
pub async fn apply_change<T: SyncedEntity>(
    cache: &EntityCache,
    incoming: T,
) -> Result<SyncOutcome, CacheError> {
    let key = incoming.cache_key();

    if incoming.is_deleted() {
        let cached = match incoming.lookup(cache).await {
            Ok(cached) => cached,
            Err(e) if e.is_not_found() => return Ok(SyncOutcome::SkippedMissing),
            Err(e) => return Err(e),
        };

        if cached.id() != incoming.id() {
            debug!(model = T::MODEL, %key, "identity mismatch, skipping delete");
            return Ok(SyncOutcome::SkippedIdMismatch);
        }

        incoming.remove_cached(cache).await?;
        debug!(model = T::MODEL, %key, "cache entry deleted");
        return Ok(SyncOutcome::Deleted);
    }

    // A lookup failure other than a miss (e.g. an unreadable stored value)
    // falls through to the upsert, which replaces the bad entry.
    if let Ok(cached) = incoming.lookup(cache).await {
        if cached.updated_at() >= incoming.updated_at() {
            debug!(
                model = T::MODEL,
                key,
                cached_updated_at = %cached.updated_at(),
                message_updated_at = %incoming.updated_at(),
                "cached version newer or equal, skipping"
            );
            return Ok(SyncOutcome::SkippedStale);
        }
    }

    incoming.upsert(cache).await?;
    debug!(
        model = T::MODEL,
        key,
        updated_at = %incoming.updated_at(),
        "cache updated from stream"
    );
    Ok(SyncOutcome::Upserted)
}

/// Start the consumer task for one entity kind's CDC topic.
///
/// Records are processed strictly in delivery order within this task. The
/// offset of every record is stored once processing was attempted, whatever
/// the outcome: the cache is a rebuildable projection, so at-least-once
/// best-effort delivery is the contract here.
pub fn spawn_consumer<T: SyncedEntity>(
    cache: Arc<EntityCache>,
    kafka: &KafkaConfig,
    topic_prefix: &str,
    group_prefix: &str,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, KafkaError> {
    let topic = format!("{topic_prefix}.public.{}", T::TABLE);
    let group = format!("{group_prefix}_{}", T::MODEL);
    let consumer = CdcConsumer::new(kafka, &group, &topic)?;

    info!(model = T::MODEL, %topic, "starting cdc consumer");

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(model = T::MODEL, "shutdown signal received, stopping consumer");
                    return;
                }
                received = consumer.json_recv::<T>() => received,
            };

            let (entity, offset) = match received {
                Ok(r) => r,
                Err(RecvErr::Empty) => {
                    warn!(model = T::MODEL, "received empty record");
                    metrics::counter!(CDC_EMPTY_RECORDS, &[("model", T::MODEL)]).increment(1);
                    continue;
                }
                Err(RecvErr::Serde(e)) => {
                    // Malformed payloads can never succeed, drop them
                    warn!(model = T::MODEL, error = %e, "failed to decode record");
                    metrics::counter!(CDC_DECODE_ERRORS, &[("model", T::MODEL)]).increment(1);
                    continue;
                }
                Err(RecvErr::Kafka(e)) => {
                    // The client reconnects at the transport level, keep polling
                    error!(model = T::MODEL, error = %e, "fetch error");
                    metrics::counter!(CDC_FETCH_ERRORS, &[("model", T::MODEL)]).increment(1);
                    continue;
                }
            };

            metrics::counter!(CDC_RECORDS_RECEIVED, &[("model", T::MODEL)]).increment(1);

            match apply_change(&cache, entity).await {
                Ok(outcome) => {
                    metrics::counter!(
                        CDC_RECORDS_APPLIED,
                        &[("model", T::MODEL), ("outcome", outcome.as_str())]
                    )
                    .increment(1);
                }
                Err(e) => {
                    error!(model = T::MODEL, error = %e, "failed to update cache from stream");
                    metrics::counter!(CDC_WRITE_FAILURES, &[("model", T::MODEL)]).increment(1);
                }
            }

            if let Err(e) = offset.store() {
                error!(model = T::MODEL, error = %e, "failed to store offset");
            }
        }
    }))
}
