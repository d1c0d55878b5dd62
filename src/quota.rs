//! C5 — quota evaluator: given a bucket and a prospective size increment,
//! decides whether both the bucket's and its owner's storage quotas would
//! still hold (spec.md §4.5).
//!
//! Grounded on the teacher's `QuotaManager` (the `RwLock<HashMap<..>>`
//! per-key cache-with-TTL shape), re-pointed from a filesystem scan at
//! C1's `aggregate_usage_by_*` queries.

use crate::metadata::MetadataStore;
use crate::models::{Bucket, UNLIMITED};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

const USAGE_CACHE_TTL: Duration = Duration::from_secs(5);

struct CachedUsage {
    bytes: i64,
    fetched_at: Instant,
}

pub struct QuotaEvaluator {
    metadata: Arc<MetadataStore>,
    bucket_usage: RwLock<HashMap<Uuid, CachedUsage>>,
    owner_usage: RwLock<HashMap<Uuid, CachedUsage>>,
}

impl QuotaEvaluator {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata,
            bucket_usage: RwLock::new(HashMap::new()),
            owner_usage: RwLock::new(HashMap::new()),
        }
    }

    /// `Check(bucket, incrementBytes)` (spec.md §4.5): true iff neither the
    /// bucket's nor its owner's quota would be exceeded by adding
    /// `increment_bytes`. `-1` on either quota disables that half of the
    /// check.
    pub async fn check(&self, bucket: &Bucket, increment_bytes: i64) -> Result<bool> {
        if bucket.storage_quota != UNLIMITED {
            let used = self.usage_for_bucket(bucket.id).await?;
            if used + increment_bytes > bucket.storage_quota {
                return Ok(false);
            }
        }

        let owner = self.metadata.find_user_by_id(bucket.owner_id).await?;
        if let Some(owner) = owner {
            if owner.storage_quota != UNLIMITED {
                let used = self.usage_for_owner(owner.id).await?;
                if used + increment_bytes > owner.storage_quota {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn usage_for_bucket(&self, bucket_id: Uuid) -> Result<i64> {
        {
            let cache = self.bucket_usage.read().await;
            if let Some(entry) = cache.get(&bucket_id) {
                if entry.fetched_at.elapsed() < USAGE_CACHE_TTL {
                    return Ok(entry.bytes);
                }
            }
        }
        let bytes = self.metadata.aggregate_usage_by_bucket(bucket_id).await?;
        self.bucket_usage.write().await.insert(bucket_id, CachedUsage { bytes, fetched_at: Instant::now() });
        Ok(bytes)
    }

    async fn usage_for_owner(&self, owner_id: Uuid) -> Result<i64> {
        {
            let cache = self.owner_usage.read().await;
            if let Some(entry) = cache.get(&owner_id) {
                if entry.fetched_at.elapsed() < USAGE_CACHE_TTL {
                    return Ok(entry.bytes);
                }
            }
        }
        let bytes = self.metadata.aggregate_usage_by_owner(owner_id).await?;
        self.owner_usage.write().await.insert(owner_id, CachedUsage { bytes, fetched_at: Instant::now() });
        Ok(bytes)
    }

    /// Applies a known delta directly to the cached totals instead of
    /// waiting for the TTL to lapse, so a burst of uploads against the same
    /// bucket in one connection sees an up-to-date count immediately.
    pub async fn record_committed(&self, bucket: &Bucket, delta_bytes: i64) {
        if let Some(entry) = self.bucket_usage.write().await.get_mut(&bucket.id) {
            entry.bytes += delta_bytes;
        }
        if let Some(entry) = self.owner_usage.write().await.get_mut(&bucket.owner_id) {
            entry.bytes += delta_bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BucketAccess;

    #[tokio::test]
    async fn allows_when_both_quotas_unlimited() {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", UNLIMITED).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, UNLIMITED).await.unwrap();
        let evaluator = QuotaEvaluator::new(metadata);
        assert!(evaluator.check(&bucket, 1_000_000).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_when_bucket_quota_would_be_exceeded() {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", UNLIMITED).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, 5).await.unwrap();
        let evaluator = QuotaEvaluator::new(metadata);
        assert!(!evaluator.check(&bucket, 6).await.unwrap());
        assert!(evaluator.check(&bucket, 5).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_when_owner_quota_would_be_exceeded_even_if_bucket_unlimited() {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", 10).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, UNLIMITED).await.unwrap();
        let evaluator = QuotaEvaluator::new(metadata);
        assert!(!evaluator.check(&bucket, 11).await.unwrap());
    }

    #[tokio::test]
    async fn folders_are_excluded_from_usage() {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", UNLIMITED).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, 0).await.unwrap();
        metadata.find_or_create_object(bucket.id, None, "dir", "folder", 0).await.unwrap();
        let evaluator = QuotaEvaluator::new(metadata);
        // Bucket quota is 0 bytes but the only object is a folder, so usage is 0.
        assert!(evaluator.check(&bucket, 0).await.unwrap());
    }
}
