//! C4 — resolves a slash-separated request path to a concrete object,
//! caching hits in C3 (spec.md §4.4).
//!
//! Grounded on `metadata.rs`'s parent-chain walk (same segment model, run
//! forward instead of backward) and `kv.rs`'s fingerprinted-key cache shape.

use crate::bucketconfig::BucketConfig;
use crate::kv::{get_json, md5_hex, set_json, KvCache};
use crate::metadata::MetadataStore;
use crate::models::{Bucket, Object, ResolvedObject};
use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

fn cache_key(bucket_name: &str, segments: &[&str]) -> String {
    format!("pathresolver:{}", md5_hex(&format!("{}:{}", bucket_name, segments.join("/"))))
}

pub struct PathResolver {
    metadata: Arc<MetadataStore>,
    cache: Arc<dyn KvCache>,
}

impl PathResolver {
    pub fn new(metadata: Arc<MetadataStore>, cache: Arc<dyn KvCache>) -> Self {
        Self { metadata, cache }
    }

    /// Resolves `path` (already split into non-empty segments, no leading or
    /// trailing slash) within `bucket_name`. Returns `None` if any segment is
    /// missing, or if a non-terminal segment names something other than a
    /// folder (spec.md §4.4 invariant: only folders are usable as
    /// intermediate parents). Caching is gated by the bucket's
    /// `cache_path_caching_enable`/`_ttl_seconds` config (spec.md §6).
    pub async fn resolve(&self, bucket_name: &str, segments: &[&str]) -> Result<Option<ResolvedObject>> {
        if segments.is_empty() {
            return Ok(None);
        }

        let Some(bucket) = self.metadata.find_bucket_by_name(bucket_name).await? else {
            return Ok(None);
        };

        let config_rows = self.metadata.get_bucket_config(bucket.id).await?;
        let config = BucketConfig(&config_rows);
        let caching = config.path_caching_enabled();

        let key = cache_key(bucket_name, segments);
        if caching {
            if let Some(hit) = get_json::<ResolvedObject>(self.cache.as_ref(), &key).await? {
                debug!(bucket = bucket_name, path = segments.join("/"), "pathresolver cache hit");
                return Ok(Some(hit));
            }
        }

        let Some(object) = self.walk(&bucket, segments).await? else {
            return Ok(None);
        };

        let resolved = ResolvedObject { object, bucket };
        if caching {
            set_json(self.cache.as_ref(), &key, &resolved, config.path_caching_ttl_seconds()).await?;
        }
        Ok(Some(resolved))
    }

    async fn walk(&self, bucket: &Bucket, segments: &[&str]) -> Result<Option<Object>> {
        let mut parent_id = None;
        let mut current: Option<Object> = None;
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            match self.metadata.find_object_in_dir(bucket.id, parent_id, segment).await? {
                Some(obj) => {
                    if !is_last && !obj.is_folder() {
                        return Ok(None);
                    }
                    parent_id = Some(obj.id);
                    current = Some(obj);
                }
                None => return Ok(None),
            }
        }
        Ok(current)
    }

    /// Invalidates every cache entry for an object's full path. Callers pass
    /// the same segments used to resolve it; C8/C9 call this after a write
    /// or delete so a stale hit never outlives the write that invalidated it
    /// (spec.md §4.4 "cache invalidation on write").
    pub async fn invalidate(&self, bucket_name: &str, segments: &[&str]) -> Result<()> {
        let key = cache_key(bucket_name, segments);
        self.cache.delete(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKvCache;
    use crate::models::BucketAccess;

    async fn setup() -> (PathResolver, Bucket) {
        let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
        let user = metadata.create_user("alice", "hash", -1).await.unwrap();
        let bucket = metadata.create_bucket("photos", user.id, BucketAccess::Private, -1).await.unwrap();
        let cache: Arc<dyn KvCache> = Arc::new(MemoryKvCache::new());
        (PathResolver::new(metadata, cache), bucket)
    }

    #[tokio::test]
    async fn resolves_nested_file_through_folders() {
        let (resolver, bucket) = setup().await;
        let metadata = resolver.metadata.clone();
        let dir = metadata.find_or_create_object(bucket.id, None, "a", "folder", 0).await.unwrap();
        let file = metadata
            .find_or_create_object(bucket.id, Some(dir.id), "b.txt", "text/plain", 5)
            .await
            .unwrap();

        let resolved = resolver.resolve("photos", &["a", "b.txt"]).await.unwrap().unwrap();
        assert_eq!(resolved.object.id, file.id);
    }

    #[tokio::test]
    async fn rejects_non_folder_intermediate_segment() {
        let (resolver, bucket) = setup().await;
        let metadata = resolver.metadata.clone();
        metadata.find_or_create_object(bucket.id, None, "a.txt", "text/plain", 1).await.unwrap();

        let resolved = resolver.resolve("photos", &["a.txt", "b.txt"]).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn missing_bucket_resolves_to_none() {
        let (resolver, _bucket) = setup().await;
        assert!(resolver.resolve("nope", &["a.txt"]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache_when_enabled() {
        let (resolver, bucket) = setup().await;
        let metadata = resolver.metadata.clone();
        metadata
            .set_bucket_config(bucket.id, "cache_path_caching_enable", "true", crate::models::BucketConfigType::Boolean)
            .await
            .unwrap();
        let file = metadata.find_or_create_object(bucket.id, None, "a.txt", "text/plain", 1).await.unwrap();

        resolver.resolve("photos", &["a.txt"]).await.unwrap();
        metadata.delete_object(file.id, false).await.unwrap();

        // Still served from cache even though the row is now gone.
        let resolved = resolver.resolve("photos", &["a.txt"]).await.unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn caching_disabled_by_default_always_reflects_current_state() {
        let (resolver, bucket) = setup().await;
        let metadata = resolver.metadata.clone();
        let file = metadata.find_or_create_object(bucket.id, None, "a.txt", "text/plain", 1).await.unwrap();

        resolver.resolve("photos", &["a.txt"]).await.unwrap();
        metadata.delete_object(file.id, false).await.unwrap();

        let resolved = resolver.resolve("photos", &["a.txt"]).await.unwrap();
        assert!(resolved.is_none());
    }
}
