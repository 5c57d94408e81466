use std::time::Instant;

use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{error, info};

use crate::cache::EntityCache;
use crate::metrics_consts::{SNAPSHOT_ROWS_FETCHED, SNAPSHOT_WRITE_FAILURES};

/// Outcome of one entity kind's bulk load. `fetched` counts rows read from
/// the source; `write_failures` counts rows that could not be cached and
/// were skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotReport {
    pub fetched: usize,
    pub write_failures: usize,
}

/// Stream every non-deleted row of a mirrored table into the cache.
///
/// The fetch is the hard precondition: any source error aborts the load and
/// propagates. Individual cache writes are best-effort: a row that fails to
/// write is logged, counted, and skipped, since the next change event for it
/// will repair the cache.
pub async fn load_snapshot<T, F>(
    cache: &EntityCache,
    model: &'static str,
    mut rows: BoxStream<'_, Result<T, sqlx::Error>>,
    key_fn: F,
) -> Result<SnapshotReport, sqlx::Error>
where
    T: Serialize,
    F: Fn(&T) -> String,
{
    info!(model, "starting snapshot load");
    let start = Instant::now();

    let mut report = SnapshotReport {
        fetched: 0,
        write_failures: 0,
    };

    while let Some(row) = rows.try_next().await? {
        report.fetched += 1;

        let key = key_fn(&row);
        if let Err(e) = cache.set_json(key.clone(), &row).await {
            error!(model, %key, error = %e, "failed to cache row");
            metrics::counter!(SNAPSHOT_WRITE_FAILURES, &[("model", model)]).increment(1);
            report.write_failures += 1;
        }
    }

    metrics::counter!(SNAPSHOT_ROWS_FETCHED, &[("model", model)])
        .increment(report.fetched as u64);
    info!(
        model,
        count = report.fetched,
        write_failures = report.write_failures,
        duration_ms = start.elapsed().as_millis() as u64,
        "completed snapshot load"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common_kvstore::{KvError, MemoryKvClient, MockKvClient};
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        name: String,
    }

    fn row(id: &str) -> Row {
        Row {
            id: id.to_string(),
            name: format!("row {id}"),
        }
    }

    fn key_fn(row: &Row) -> String {
        format!("row:{}", row.id)
    }

    #[tokio::test]
    async fn test_load_snapshot_caches_every_fetched_row() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        let rows = futures::stream::iter(vec![Ok(row("a")), Ok(row("b"))]).boxed();

        let report = load_snapshot(&cache, "rows", rows, key_fn).await.unwrap();

        assert_eq!(
            report,
            SnapshotReport {
                fetched: 2,
                write_failures: 0
            }
        );
        let cached: Row = cache.get_json("row:a".to_string()).await.unwrap();
        assert_eq!(cached, row("a"));
    }

    #[tokio::test]
    async fn test_load_snapshot_of_empty_table_succeeds_with_zero() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        let rows = futures::stream::iter(Vec::<Result<Row, sqlx::Error>>::new()).boxed();

        let report = load_snapshot(&cache, "rows", rows, key_fn).await.unwrap();

        assert_eq!(report.fetched, 0);
        assert_eq!(report.write_failures, 0);
    }

    #[tokio::test]
    async fn test_load_snapshot_propagates_fetch_errors() {
        let cache = EntityCache::new(Arc::new(MemoryKvClient::new()));
        let rows = futures::stream::iter(vec![
            Ok(row("a")),
            Err(sqlx::Error::Protocol("connection reset".to_string())),
            Ok(row("b")),
        ])
        .boxed();

        let result = load_snapshot(&cache, "rows", rows, key_fn).await;

        assert!(result.is_err());
        // the row fetched before the failure stays cached; the cache heals
        // itself from the stream later
        assert!(cache.get_json::<Row>("row:a".to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_snapshot_tolerates_individual_write_failures() {
        let store = MockKvClient::new()
            .set_err_ret("row:b", KvError::Storage("injected".to_string()));
        let cache = EntityCache::new(Arc::new(store));
        let rows =
            futures::stream::iter(vec![Ok(row("a")), Ok(row("b")), Ok(row("c"))]).boxed();

        let report = load_snapshot(&cache, "rows", rows, key_fn).await.unwrap();

        assert_eq!(
            report,
            SnapshotReport {
                fetched: 3,
                write_failures: 1
            }
        );
        assert!(cache.get_json::<Row>("row:a".to_string()).await.is_ok());
        assert!(cache
            .get_json::<Row>("row:b".to_string())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(cache.get_json::<Row>("row:c".to_string()).await.is_ok());
    }
}
