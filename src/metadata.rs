//! C1 — durable catalog of users, buckets, objects, credentials,
//! bucket-config and per-day stats (spec.md §4.1).
//!
//! Grounded on the teacher's `metadata.rs` (which already reached for
//! `sqlx::sqlite::SqlitePool` before the rest of the module was wired up)
//! and `storage::StorageBackend`'s trait-over-backend shape.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    Bucket, BucketAccess, BucketConfigEntry, BucketConfigType, DailyStats, Object, S3Credential,
    User,
};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(&config.database.url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                is_admin INTEGER NOT NULL DEFAULT 0,
                storage_quota INTEGER NOT NULL DEFAULT -1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                owner_id TEXT NOT NULL REFERENCES users(id),
                access TEXT NOT NULL DEFAULT 'private',
                storage_quota INTEGER NOT NULL DEFAULT -1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bucket_config (
                bucket_id TEXT NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                type TEXT NOT NULL,
                PRIMARY KEY (bucket_id, key)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                id TEXT PRIMARY KEY,
                bucket_id TEXT NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
                parent_id TEXT REFERENCES objects(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(bucket_id, parent_id, filename)
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_parent ON objects(bucket_id, parent_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                expires_at TEXT,
                is_api INTEGER NOT NULL DEFAULT 1
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS s3_credentials (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                access_key TEXT NOT NULL UNIQUE,
                secret_key TEXT NOT NULL,
                bucket_access TEXT NOT NULL DEFAULT '[]'
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                bucket_id TEXT NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
                day TEXT NOT NULL,
                api_requests INTEGER NOT NULL DEFAULT 0,
                s3_requests INTEGER NOT NULL DEFAULT 0,
                webdav_requests INTEGER NOT NULL DEFAULT 0,
                requests_count INTEGER NOT NULL DEFAULT 0,
                bytes_served INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (bucket_id, day)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- users ----

    pub async fn create_user(&self, username: &str, password_hash: &str, storage_quota: i64) -> Result<User> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, enabled, is_admin, storage_quota, created_at, updated_at)
             VALUES (?, ?, ?, 1, 0, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(username)
        .bind(password_hash)
        .bind(storage_quota)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.find_user_by_id(id).await?.ok_or_else(|| Error::Internal("user vanished after insert".into()))
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    // ---- buckets ----

    pub async fn create_bucket(
        &self,
        name: &str,
        owner_id: Uuid,
        access: BucketAccess,
        storage_quota: i64,
    ) -> Result<Bucket> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, access, storage_quota, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(owner_id.to_string())
        .bind(access.as_str())
        .bind(storage_quota)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::BucketAlreadyExists,
            other => other.into(),
        })?;
        self.find_bucket_by_name(name)
            .await?
            .ok_or_else(|| Error::Internal("bucket vanished after insert".into()))
    }

    pub async fn find_bucket_by_name(&self, name: &str) -> Result<Option<Bucket>> {
        let row = sqlx::query("SELECT * FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_bucket(&r)))
    }

    pub async fn find_bucket_by_id(&self, id: Uuid) -> Result<Option<Bucket>> {
        let row = sqlx::query("SELECT * FROM buckets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_bucket(&r)))
    }

    pub async fn list_buckets_for_owner(&self, owner_id: Uuid) -> Result<Vec<Bucket>> {
        let rows = sqlx::query("SELECT * FROM buckets WHERE owner_id = ? ORDER BY name")
            .bind(owner_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_bucket).collect())
    }

    /// Cascades to objects (FK `ON DELETE CASCADE`); blob cleanup is the
    /// caller's responsibility (C2 is not transactional with C1).
    pub async fn delete_bucket(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_bucket_config(&self, bucket_id: Uuid) -> Result<Vec<BucketConfigEntry>> {
        let rows = sqlx::query("SELECT * FROM bucket_config WHERE bucket_id = ?")
            .bind(bucket_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| BucketConfigEntry {
                bucket_id,
                key: r.get("key"),
                value: r.get("value"),
                config_type: match r.get::<String, _>("type").as_str() {
                    "NUMBER" => BucketConfigType::Number,
                    "BOOLEAN" => BucketConfigType::Boolean,
                    "SELECT" => BucketConfigType::Select,
                    _ => BucketConfigType::String,
                },
            })
            .collect())
    }

    pub async fn set_bucket_config(
        &self,
        bucket_id: Uuid,
        key: &str,
        value: &str,
        config_type: BucketConfigType,
    ) -> Result<()> {
        let type_str = match config_type {
            BucketConfigType::String => "STRING",
            BucketConfigType::Number => "NUMBER",
            BucketConfigType::Boolean => "BOOLEAN",
            BucketConfigType::Select => "SELECT",
        };
        sqlx::query(
            "INSERT INTO bucket_config (bucket_id, key, value, type) VALUES (?, ?, ?, ?)
             ON CONFLICT(bucket_id, key) DO UPDATE SET value = excluded.value, type = excluded.type",
        )
        .bind(bucket_id.to_string())
        .bind(key)
        .bind(value)
        .bind(type_str)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- objects ----

    pub async fn find_object_in_dir(
        &self,
        bucket_id: Uuid,
        parent_id: Option<Uuid>,
        filename: &str,
    ) -> Result<Option<Object>> {
        let row = match parent_id {
            Some(parent) => {
                sqlx::query("SELECT * FROM objects WHERE bucket_id = ? AND parent_id = ? AND filename = ?")
                    .bind(bucket_id.to_string())
                    .bind(parent.to_string())
                    .bind(filename)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM objects WHERE bucket_id = ? AND parent_id IS NULL AND filename = ?")
                    .bind(bucket_id.to_string())
                    .bind(filename)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.map(|r| row_to_object(&r)))
    }

    pub async fn list_children(&self, bucket_id: Uuid, parent_id: Option<Uuid>) -> Result<Vec<Object>> {
        let rows = match parent_id {
            Some(parent) => {
                sqlx::query("SELECT * FROM objects WHERE bucket_id = ? AND parent_id = ? ORDER BY filename")
                    .bind(bucket_id.to_string())
                    .bind(parent.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM objects WHERE bucket_id = ? AND parent_id IS NULL ORDER BY filename")
                    .bind(bucket_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_object).collect())
    }

    /// Every non-folder (and folder) object in the bucket, with its
    /// slash-joined key computed by walking the parent chain. Used by the
    /// S3 list operations (spec.md §4.11), which require the recursive
    /// definition rather than the children-of-prefix variant (spec.md §9).
    pub async fn list_objects_recursively(&self, bucket_id: Uuid) -> Result<Vec<(Object, String)>> {
        let rows = sqlx::query("SELECT * FROM objects WHERE bucket_id = ?")
            .bind(bucket_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let objects: Vec<Object> = rows.iter().map(row_to_object).collect();
        let by_id: std::collections::HashMap<Uuid, &Object> = objects.iter().map(|o| (o.id, o)).collect();

        let mut out = Vec::with_capacity(objects.len());
        for obj in &objects {
            let mut segments = vec![obj.filename.clone()];
            let mut cursor = obj.parent_id;
            while let Some(pid) = cursor {
                match by_id.get(&pid) {
                    Some(parent) => {
                        segments.push(parent.filename.clone());
                        cursor = parent.parent_id;
                    }
                    None => break,
                }
            }
            segments.reverse();
            let mut key = segments.join("/");
            if obj.is_folder() {
                key.push('/');
            }
            out.push((obj.clone(), key));
        }
        out.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(out)
    }

    /// Walks `parent_id` up to the bucket root and returns the slash-joined
    /// key for a single object (used by ListMultipartUploads, spec.md
    /// §4.8, which must report the full key for each session).
    pub async fn full_key_for(&self, object_id: Uuid) -> Result<String> {
        let mut segments = Vec::new();
        let mut cursor = Some(object_id);
        while let Some(id) = cursor {
            let row = sqlx::query("SELECT filename, parent_id FROM objects WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(r) => {
                    segments.push(r.get::<String, _>("filename"));
                    cursor = r
                        .get::<Option<String>, _>("parent_id")
                        .map(|s| Uuid::parse_str(&s))
                        .transpose()
                        .map_err(|e| Error::Internal(e.to_string()))?;
                }
                None => break,
            }
        }
        segments.reverse();
        Ok(segments.join("/"))
    }

    /// Atomically returns the existing row on a `(bucket_id, parent_id,
    /// filename)` conflict instead of erroring (spec.md §4.1 `findOrCreate`,
    /// invariant (a)).
    pub async fn find_or_create_object(
        &self,
        bucket_id: Uuid,
        parent_id: Option<Uuid>,
        filename: &str,
        mime_type: &str,
        size: i64,
    ) -> Result<Object> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO objects (id, bucket_id, parent_id, filename, mime_type, size, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(bucket_id, parent_id, filename) DO UPDATE SET
                mime_type = excluded.mime_type, size = excluded.size, updated_at = excluded.updated_at",
        )
        .bind(id.to_string())
        .bind(bucket_id.to_string())
        .bind(parent_id.map(|p| p.to_string()))
        .bind(filename)
        .bind(mime_type)
        .bind(size)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.find_object_in_dir(bucket_id, parent_id, filename)
            .await?
            .ok_or_else(|| Error::Internal("object vanished after find_or_create".into()))
    }

    pub async fn find_object_by_id(&self, id: Uuid) -> Result<Option<Object>> {
        let row = sqlx::query("SELECT * FROM objects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_object(&r)))
    }

    /// Deletes the object (cascading to children via FK). If
    /// `clear_empty_parents` is set and the parent becomes empty, deletes
    /// the parent too, recursively up to the bucket root (spec.md §4.1,
    /// bucket-config `s3_clear_empty_parents`).
    pub async fn delete_object(&self, id: Uuid, clear_empty_parents: bool) -> Result<()> {
        let obj = self.find_object_by_id(id).await?;
        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if clear_empty_parents {
            if let Some(obj) = obj {
                let mut cursor = obj.parent_id;
                while let Some(parent_id) = cursor {
                    let remaining = sqlx::query("SELECT COUNT(*) as n FROM objects WHERE parent_id = ?")
                        .bind(parent_id.to_string())
                        .fetch_one(&self.pool)
                        .await?
                        .get::<i64, _>("n");
                    if remaining > 0 {
                        break;
                    }
                    let parent = self.find_object_by_id(parent_id).await?;
                    sqlx::query("DELETE FROM objects WHERE id = ?")
                        .bind(parent_id.to_string())
                        .execute(&self.pool)
                        .await?;
                    cursor = parent.and_then(|p| p.parent_id);
                }
            }
        }
        Ok(())
    }

    /// Sum of `size` over non-folder objects in the bucket (C5).
    pub async fn aggregate_usage_by_bucket(&self, bucket_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(size), 0) as total FROM objects WHERE bucket_id = ? AND mime_type != 'folder'",
        )
        .bind(bucket_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    /// Sum of `size` over non-folder objects across every bucket owned by
    /// `owner_id` (C5).
    pub async fn aggregate_usage_by_owner(&self, owner_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(o.size), 0) as total FROM objects o
             JOIN buckets b ON o.bucket_id = b.id
             WHERE b.owner_id = ? AND o.mime_type != 'folder'",
        )
        .bind(owner_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    // ---- credentials ----

    pub async fn create_s3_credential(
        &self,
        user_id: Uuid,
        access_key: &str,
        secret_key: &str,
        bucket_access: &[Uuid],
    ) -> Result<S3Credential> {
        let id = Uuid::new_v4();
        let bucket_json = serde_json::to_string(&bucket_access.iter().map(|b| b.to_string()).collect::<Vec<_>>())?;
        sqlx::query(
            "INSERT INTO s3_credentials (id, user_id, access_key, secret_key, bucket_access) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(access_key)
        .bind(secret_key)
        .bind(bucket_json)
        .execute(&self.pool)
        .await?;
        self.find_s3_credential(access_key)
            .await?
            .ok_or_else(|| Error::Internal("credential vanished after insert".into()))
    }

    pub async fn find_s3_credential(&self, access_key: &str) -> Result<Option<S3Credential>> {
        let row = sqlx::query("SELECT * FROM s3_credentials WHERE access_key = ?")
            .bind(access_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_s3_credential(&r)).transpose()?)
    }

    pub async fn find_api_token_user(&self, token: &str) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT user_id, expires_at FROM api_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(r) => {
                if let Some(expires_at) = r.get::<Option<String>, _>("expires_at") {
                    let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
                        .map_err(|e| Error::Internal(e.to_string()))?;
                    if expires_at.with_timezone(&Utc) < Utc::now() {
                        return Ok(None);
                    }
                }
                let id: String = r.get("user_id");
                Ok(Some(Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?))
            }
        }
    }

    // ---- stats (C6) ----

    pub async fn flush_stats(&self, bucket_id: Uuid, day: NaiveDate, delta: &DailyStats) -> Result<()> {
        sqlx::query(
            "INSERT INTO daily_stats (bucket_id, day, api_requests, s3_requests, webdav_requests, requests_count, bytes_served)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(bucket_id, day) DO UPDATE SET
                api_requests = api_requests + excluded.api_requests,
                s3_requests = s3_requests + excluded.s3_requests,
                webdav_requests = webdav_requests + excluded.webdav_requests,
                requests_count = requests_count + excluded.requests_count,
                bytes_served = bytes_served + excluded.bytes_served",
        )
        .bind(bucket_id.to_string())
        .bind(day.to_string())
        .bind(delta.api_requests)
        .bind(delta.s3_requests)
        .bind(delta.webdav_requests)
        .bind(delta.requests_count)
        .bind(delta.bytes_served)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_user(r: &SqliteRow) -> User {
    User {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        username: r.get("username"),
        password_hash: r.get("password_hash"),
        enabled: r.get::<i64, _>("enabled") != 0,
        is_admin: r.get::<i64, _>("is_admin") != 0,
        storage_quota: r.get("storage_quota"),
        created_at: parse_ts(r.get("created_at")),
        updated_at: parse_ts(r.get("updated_at")),
    }
}

fn row_to_bucket(r: &SqliteRow) -> Bucket {
    Bucket {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        name: r.get("name"),
        owner_id: Uuid::parse_str(&r.get::<String, _>("owner_id")).unwrap_or_default(),
        access: BucketAccess::parse(&r.get::<String, _>("access")).unwrap_or(BucketAccess::Private),
        storage_quota: r.get("storage_quota"),
        created_at: parse_ts(r.get("created_at")),
        updated_at: parse_ts(r.get("updated_at")),
    }
}

fn row_to_object(r: &SqliteRow) -> Object {
    Object {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        bucket_id: Uuid::parse_str(&r.get::<String, _>("bucket_id")).unwrap_or_default(),
        parent_id: r
            .get::<Option<String>, _>("parent_id")
            .map(|s| Uuid::parse_str(&s).unwrap_or_default()),
        filename: r.get("filename"),
        mime_type: r.get("mime_type"),
        size: r.get("size"),
        created_at: parse_ts(r.get("created_at")),
        updated_at: parse_ts(r.get("updated_at")),
    }
}

fn row_to_s3_credential(r: &SqliteRow) -> Result<S3Credential> {
    let bucket_access_json: String = r.get("bucket_access");
    let ids: Vec<String> = serde_json::from_str(&bucket_access_json)?;
    let bucket_access = ids
        .into_iter()
        .map(|s| Uuid::parse_str(&s).map_err(|e| Error::Internal(e.to_string())))
        .collect::<Result<Vec<_>>>()?;
    Ok(S3Credential {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        user_id: Uuid::parse_str(&r.get::<String, _>("user_id")).unwrap_or_default(),
        access_key: r.get("access_key"),
        secret_key: r.get("secret_key"),
        bucket_access,
    })
}

fn parse_ts(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (MetadataStore, Uuid, Uuid) {
        let store = MetadataStore::connect_memory().await.unwrap();
        let user = store.create_user("alice", "hash", UNLIMITED_QUOTA).await.unwrap();
        let bucket = store
            .create_bucket("photos", user.id, BucketAccess::Private, UNLIMITED_QUOTA)
            .await
            .unwrap();
        (store, user.id, bucket.id)
    }

    const UNLIMITED_QUOTA: i64 = -1;

    #[tokio::test]
    async fn find_or_create_returns_existing_row_on_conflict() {
        let (store, _user, bucket) = setup().await;
        let a = store
            .find_or_create_object(bucket, None, "a.txt", "text/plain", 3)
            .await
            .unwrap();
        let b = store
            .find_or_create_object(bucket, None, "a.txt", "text/plain", 10)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.size, 10);
    }

    #[tokio::test]
    async fn recursive_list_computes_full_keys() {
        let (store, _user, bucket) = setup().await;
        let dir = store
            .find_or_create_object(bucket, None, "a", "folder", 0)
            .await
            .unwrap();
        store
            .find_or_create_object(bucket, Some(dir.id), "b.txt", "text/plain", 5)
            .await
            .unwrap();
        store.find_or_create_object(bucket, None, "d.txt", "text/plain", 1).await.unwrap();

        let listed = store.list_objects_recursively(bucket).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|(_, k)| k.clone()).collect();
        assert!(keys.contains(&"a/".to_string()));
        assert!(keys.contains(&"a/b.txt".to_string()));
        assert!(keys.contains(&"d.txt".to_string()));
    }

    #[tokio::test]
    async fn aggregate_usage_excludes_folders() {
        let (store, user, bucket) = setup().await;
        let dir = store.find_or_create_object(bucket, None, "a", "folder", 0).await.unwrap();
        store
            .find_or_create_object(bucket, Some(dir.id), "b.txt", "text/plain", 7)
            .await
            .unwrap();
        assert_eq!(store.aggregate_usage_by_bucket(bucket).await.unwrap(), 7);
        assert_eq!(store.aggregate_usage_by_owner(user).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn clear_empty_parents_deletes_up_to_root() {
        let (store, _user, bucket) = setup().await;
        let a = store.find_or_create_object(bucket, None, "a", "folder", 0).await.unwrap();
        let b = store.find_or_create_object(bucket, Some(a.id), "b", "folder", 0).await.unwrap();
        let f = store
            .find_or_create_object(bucket, Some(b.id), "f.txt", "text/plain", 1)
            .await
            .unwrap();

        store.delete_object(f.id, true).await.unwrap();

        assert!(store.find_object_by_id(a.id).await.unwrap().is_none());
        assert!(store.find_object_by_id(b.id).await.unwrap().is_none());
    }
}
