//! C2 — content-addressed blob tree on local disk (spec.md §4.2).
//!
//! Grounded on the teacher's `storage/filesystem.rs` (directory layout,
//! atomic-publish-by-rename idiom), adapted from key-path naming to
//! `<bucketName>/<objectId>` naming with a shared `.temp` scratch area.

use crate::config::StorageConfig;
use crate::error::Result;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self { root: config.path.clone() }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(".temp")
    }

    fn blob_path(&self, bucket_name: &str, object_id: Uuid) -> PathBuf {
        self.root.join(bucket_name).join(object_id.to_string())
    }

    /// Creates `.temp` and removes anything left in it from a prior, less
    /// than graceful shutdown (spec.md §4.2 "Cleanup on start").
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let temp = self.temp_dir();
        if temp.exists() {
            fs::remove_dir_all(&temp).await?;
        }
        fs::create_dir_all(&temp).await?;
        Ok(())
    }

    /// A fresh scratch path under `.temp` for a caller to write into before
    /// publishing.
    pub fn new_scratch_path(&self) -> PathBuf {
        self.temp_dir().join(Uuid::new_v4().to_string())
    }

    /// Renames `scratch` into its final content-addressed location. The
    /// rename is atomic within a filesystem; crossing mounts is not
    /// supported (spec.md §4.2).
    pub async fn publish(&self, bucket_name: &str, object_id: Uuid, scratch: &std::path::Path) -> Result<()> {
        let dest = self.blob_path(bucket_name, object_id);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(scratch, &dest).await?;
        debug!(bucket = bucket_name, object = %object_id, "published blob");
        Ok(())
    }

    /// Idempotent: an absent file is not an error (spec.md §4.2).
    pub async fn delete(&self, bucket_name: &str, object_id: Uuid) -> Result<()> {
        let path = self.blob_path(bucket_name, object_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(bucket = bucket_name, object = %object_id, error = %e, "failed to delete blob");
                Err(e.into())
            }
        }
    }

    pub async fn exists(&self, bucket_name: &str, object_id: Uuid) -> bool {
        fs::metadata(self.blob_path(bucket_name, object_id)).await.is_ok()
    }

    pub fn path_for(&self, bucket_name: &str, object_id: Uuid) -> PathBuf {
        self.blob_path(bucket_name, object_id)
    }

    pub async fn open(&self, bucket_name: &str, object_id: Uuid) -> Result<fs::File> {
        Ok(fs::File::open(self.blob_path(bucket_name, object_id)).await?)
    }

    /// Deletes every blob under a bucket (used when the bucket itself is
    /// deleted, cascading from C1).
    pub async fn delete_bucket_dir(&self, bucket_name: &str) -> Result<()> {
        let path = self.root.join(bucket_name);
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
