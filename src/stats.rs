//! C6 — in-process request/byte counters, periodically flushed to C1 as
//! additive deltas (spec.md §4.6).
//!
//! Grounded on the teacher's `QuotaManager::{increment_stat,
//! start_flush_task}` (in-memory accumulate, flush-on-interval, drop on
//! flush failure and let the next tick retry).

use crate::metadata::MetadataStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error};
use uuid::Uuid;

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy)]
pub enum RequestKind {
    Api,
    S3,
    WebDav,
}

#[derive(Default, Clone)]
struct Counters {
    api_requests: i64,
    s3_requests: i64,
    webdav_requests: i64,
    requests_count: i64,
    bytes_served: i64,
}

pub struct StatsAggregator {
    metadata: Arc<MetadataStore>,
    counters: Mutex<HashMap<Uuid, Counters>>,
}

impl StatsAggregator {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self { metadata, counters: Mutex::new(HashMap::new()) }
    }

    pub async fn record(&self, bucket_id: Uuid, kind: RequestKind, bytes_served: i64) {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(bucket_id).or_default();
        match kind {
            RequestKind::Api => entry.api_requests += 1,
            RequestKind::S3 => entry.s3_requests += 1,
            RequestKind::WebDav => entry.webdav_requests += 1,
        }
        entry.requests_count += 1;
        entry.bytes_served += bytes_served;
    }

    /// Drains the in-memory counters and commits them to C1 as additive
    /// deltas. Buckets with nothing to report are skipped.
    pub async fn flush(&self) {
        let drained: HashMap<Uuid, Counters> = {
            let mut counters = self.counters.lock().await;
            std::mem::take(&mut *counters)
        };
        if drained.is_empty() {
            return;
        }
        let today = Utc::now().date_naive();
        for (bucket_id, c) in drained {
            let delta = crate::models::DailyStats {
                bucket_id,
                day: today,
                api_requests: c.api_requests,
                s3_requests: c.s3_requests,
                webdav_requests: c.webdav_requests,
                requests_count: c.requests_count,
                bytes_served: c.bytes_served,
            };
            if let Err(e) = self.metadata.flush_stats(bucket_id, today, &delta).await {
                error!(bucket = %bucket_id, error = %e, "failed to flush stats, counters lost");
            } else {
                debug!(bucket = %bucket_id, "flushed stats");
            }
        }
    }

    /// Runs forever, flushing on a fixed interval. Spawned once from
    /// `server::run`.
    pub async fn run_flush_loop(self: Arc<Self>) {
        let mut ticker = interval(FLUSH_INTERVAL);
        loop {
            ticker.tick().await;
            self.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BucketAccess;

    #[tokio::test]
    async fn flush_commits_accumulated_counters() {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", -1).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, -1).await.unwrap();

        let stats = StatsAggregator::new(metadata.clone());
        stats.record(bucket.id, RequestKind::S3, 100).await;
        stats.record(bucket.id, RequestKind::S3, 50).await;
        stats.record(bucket.id, RequestKind::Api, 0).await;
        stats.flush().await;

        let row = sqlx_row_count(&metadata, bucket.id).await;
        assert_eq!(row, (2, 1, 150));
    }

    #[tokio::test]
    async fn flush_is_additive_across_calls() {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", -1).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, -1).await.unwrap();

        let stats = StatsAggregator::new(metadata.clone());
        stats.record(bucket.id, RequestKind::S3, 10).await;
        stats.flush().await;
        stats.record(bucket.id, RequestKind::S3, 10).await;
        stats.flush().await;

        let row = sqlx_row_count(&metadata, bucket.id).await;
        assert_eq!(row, (2, 0, 20));
    }

    async fn sqlx_row_count(metadata: &MetadataStore, bucket_id: Uuid) -> (i64, i64, i64) {
        let row = sqlx::query("SELECT s3_requests, api_requests, bytes_served FROM daily_stats WHERE bucket_id = ?")
            .bind(bucket_id.to_string())
            .fetch_one(metadata.pool())
            .await
            .unwrap();
        use sqlx::Row;
        (row.get("s3_requests"), row.get("api_requests"), row.get("bytes_served"))
    }
}
