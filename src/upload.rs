//! C8 — upload state machines: single-shot PUT and S3 multipart (spec.md
//! §4.8). The file-request chunked flow shares this module's scratch
//! helpers but lives in `filereq.rs` (C12) since its session shape and
//! quota-truncation behavior differ.
//!
//! Grounded on the teacher's `multipart.rs` (`MultipartManager`/`Part`
//! shape, generalized from in-memory `Vec<u8>` parts to `.temp/`-backed
//! scratch files) and `blob.rs`'s atomic-publish idiom.

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::kv::{get_json, set_json, KvCache};
use crate::metadata::MetadataStore;
use crate::models::{Bucket, MultipartSession, Object, UploadPart, FOLDER_MIME_TYPE};
use crate::pathresolver::PathResolver;
use crate::quota::QuotaEvaluator;
use axum::body::Body;
use futures_util::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use uuid::Uuid;

const STREAM_CHUNK_SIZE: usize = 1024 * 1024;
const MULTIPART_SESSION_PREFIX: &str = "multipart:session:";
/// "Reasonable cap ≥ 24h" (spec.md §3) for an abandoned multipart session.
const MULTIPART_SESSION_TTL_SECONDS: u64 = 24 * 3600;

/// The split of a request path into its parent directory segments and
/// final filename, with the parent resolved against C4.
pub struct TargetLocation {
    pub bucket: Bucket,
    pub parent_id: Option<Uuid>,
    pub filename: String,
}

pub struct UploadEngine {
    metadata: Arc<MetadataStore>,
    blob: Arc<BlobStore>,
    quota: Arc<QuotaEvaluator>,
    cache: Arc<dyn KvCache>,
    resolver: Arc<PathResolver>,
}

impl UploadEngine {
    pub fn new(
        metadata: Arc<MetadataStore>,
        blob: Arc<BlobStore>,
        quota: Arc<QuotaEvaluator>,
        cache: Arc<dyn KvCache>,
        resolver: Arc<PathResolver>,
    ) -> Self {
        Self { metadata, blob, quota, cache, resolver }
    }

    /// Resolves all but the last segment as the parent directory,
    /// auto-vivifying any missing intermediate folder (spec.md §4.8: a PUT
    /// into a fresh bucket must succeed). Only fails when an intermediate
    /// segment exists and is not a folder.
    pub async fn resolve_target(&self, bucket: &Bucket, segments: &[&str]) -> Result<TargetLocation> {
        let (parent_segments, filename) = segments.split_at(segments.len() - 1);
        let filename = filename.first().ok_or_else(|| Error::InvalidArgument("empty key".into()))?;

        let mut parent_id: Option<Uuid> = None;
        for segment in parent_segments {
            parent_id = Some(match self.metadata.find_object_in_dir(bucket.id, parent_id, segment).await? {
                Some(existing) if existing.is_folder() => existing.id,
                Some(_) => return Err(Error::InvalidArgument("parent is not a folder".into())),
                None => {
                    let folder = self.metadata.find_or_create_object(bucket.id, parent_id, segment, FOLDER_MIME_TYPE, 0).await?;
                    folder.id
                }
            });
        }

        Ok(TargetLocation { bucket: bucket.clone(), parent_id, filename: filename.to_string() })
    }

    /// Single-shot `PUT <bucket>/<key>` (spec.md §4.8). A key ending in `/`
    /// creates a folder instead of accepting a body.
    pub async fn put_object(
        &self,
        bucket: &Bucket,
        segments: &[&str],
        is_folder: bool,
        content_type: &str,
        body: Body,
    ) -> Result<Object> {
        let target = self.resolve_target(bucket, segments).await?;

        if is_folder {
            let obj = self
                .metadata
                .find_or_create_object(bucket.id, target.parent_id, &target.filename, FOLDER_MIME_TYPE, 0)
                .await?;
            self.invalidate_path(bucket, segments).await;
            return Ok(obj);
        }

        let scratch = self.blob.new_scratch_path();
        let size = match stream_body_to_file(body, &scratch).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&scratch).await;
                return Err(e);
            }
        };

        if !self.quota.check(bucket, size).await? {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(Error::QuotaExceededReset);
        }

        let obj = self
            .metadata
            .find_or_create_object(bucket.id, target.parent_id, &target.filename, content_type, size)
            .await?;
        self.blob.publish(&bucket.name, obj.id, &scratch).await?;
        self.quota.record_committed(bucket, size).await;
        self.invalidate_path(bucket, segments).await;
        info!(bucket = %bucket.name, object = %obj.id, size, "published object");
        Ok(obj)
    }

    /// Copies an existing object's blob into a new location
    /// (`x-amz-copy-source`, spec.md §4.8). Caller has already checked
    /// source-bucket access.
    pub async fn copy_object(&self, dest_bucket: &Bucket, segments: &[&str], source: &Object, source_bucket_name: &str) -> Result<Object> {
        let target = self.resolve_target(dest_bucket, segments).await?;
        if !self.quota.check(dest_bucket, source.size).await? {
            return Err(Error::QuotaExceededReset);
        }
        let scratch = self.blob.new_scratch_path();
        tokio::fs::copy(self.blob.path_for(source_bucket_name, source.id), &scratch).await?;
        let obj = self
            .metadata
            .find_or_create_object(dest_bucket.id, target.parent_id, &target.filename, &source.mime_type, source.size)
            .await?;
        self.blob.publish(&dest_bucket.name, obj.id, &scratch).await?;
        self.quota.record_committed(dest_bucket, source.size).await;
        self.invalidate_path(dest_bucket, segments).await;
        Ok(obj)
    }

    async fn invalidate_path(&self, bucket: &Bucket, segments: &[&str]) {
        let _ = self.resolver.invalidate(&bucket.name, segments).await;
    }

    // ---- multipart ----

    fn session_key(upload_id: Uuid) -> String {
        format!("{}{}", MULTIPART_SESSION_PREFIX, upload_id)
    }

    pub async fn initiate_multipart(&self, bucket: &Bucket, segments: &[&str], mime_type: &str) -> Result<MultipartSession> {
        let target = self.resolve_target(bucket, segments).await?;
        let upload_id = Uuid::new_v4();
        let temp_file_base = self
            .blob
            .temp_dir()
            .join(format!("multipart_{}_{{{{partNumber}}}}", upload_id))
            .to_string_lossy()
            .to_string();

        let session = MultipartSession {
            upload_id,
            bucket: bucket.clone(),
            filename: target.filename,
            parent_id: target.parent_id,
            temp_file_base,
            parts: Vec::new(),
            mime_type: mime_type.to_string(),
        };
        set_json(self.cache.as_ref(), &Self::session_key(upload_id), &session, MULTIPART_SESSION_TTL_SECONDS).await?;
        Ok(session)
    }

    async fn load_session(&self, upload_id: Uuid) -> Result<MultipartSession> {
        get_json(self.cache.as_ref(), &Self::session_key(upload_id)).await?.ok_or(Error::NoSuchUpload)
    }

    async fn save_session(&self, session: &MultipartSession) -> Result<()> {
        set_json(self.cache.as_ref(), &Self::session_key(session.upload_id), session, MULTIPART_SESSION_TTL_SECONDS).await
    }

    /// `UploadPart` (spec.md §4.8). A second upload of an already-recorded
    /// part number replaces its record rather than appending a duplicate
    /// (spec.md §5 "implementations SHOULD detect and reject duplicates").
    pub async fn upload_part(&self, upload_id: Uuid, part_number: i32, body: Body) -> Result<String> {
        if part_number < 1 {
            return Err(Error::InvalidPart);
        }
        let mut session = self.load_session(upload_id).await?;
        let path = PathBuf::from(session.part_path(part_number));
        stream_body_to_file(body, &path).await?;
        let data = tokio::fs::read(&path).await?;
        let etag = format!("{:x}", md5::compute(&data));

        session.parts.retain(|p| p.part_number != part_number);
        session.parts.push(UploadPart { part_number, path: path.to_string_lossy().to_string(), etag: etag.clone() });
        self.save_session(&session).await?;
        Ok(etag)
    }

    /// `Complete` (spec.md §4.8): sorts parts ascending, concatenates them
    /// into one scratch file, deletes each part as it is consumed, then
    /// publishes and drops the session.
    pub async fn complete_multipart(&self, upload_id: Uuid) -> Result<Object> {
        let mut session = self.load_session(upload_id).await?;
        if session.parts.is_empty() {
            return Err(Error::InvalidRequest("multipart upload has no parts".into()));
        }
        session.parts.sort_by_key(|p| p.part_number);

        let final_path = self.blob.temp_dir().join(format!("multipart_final_{}", upload_id));
        let mut final_file = tokio::fs::File::create(&final_path).await?;
        let mut total: i64 = 0;
        for part in &session.parts {
            let mut part_file = tokio::fs::File::open(&part.path).await?;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = part_file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                final_file.write_all(&buf[..n]).await?;
                total += n as i64;
            }
            drop(part_file);
            let _ = tokio::fs::remove_file(&part.path).await;
        }
        final_file.flush().await?;
        drop(final_file);

        if !self.quota.check(&session.bucket, total).await? {
            let _ = tokio::fs::remove_file(&final_path).await;
            self.cache.delete(&Self::session_key(upload_id)).await?;
            return Err(Error::QuotaExceededReset);
        }

        let obj = self
            .metadata
            .find_or_create_object(session.bucket.id, session.parent_id, &session.filename, &session.mime_type, total)
            .await?;
        self.blob.publish(&session.bucket.name, obj.id, &final_path).await?;
        self.quota.record_committed(&session.bucket, total).await;
        self.cache.delete(&Self::session_key(upload_id)).await?;
        debug!(upload_id = %upload_id, object = %obj.id, "completed multipart upload");
        Ok(obj)
    }

    /// `Abort` (spec.md §4.8): unlinks every part file and drops the
    /// session.
    pub async fn abort_multipart(&self, upload_id: Uuid) -> Result<()> {
        let session = self.load_session(upload_id).await?;
        for part in &session.parts {
            let _ = tokio::fs::remove_file(&part.path).await;
        }
        self.cache.delete(&Self::session_key(upload_id)).await?;
        Ok(())
    }

    /// `ListParts` (spec.md §4.8): parts with `partNum > marker`, sorted,
    /// truncated at `max_parts`.
    pub async fn list_parts(&self, upload_id: Uuid, max_parts: usize, part_number_marker: i32) -> Result<(Vec<UploadPart>, bool)> {
        let mut session = self.load_session(upload_id).await?;
        session.parts.sort_by_key(|p| p.part_number);
        let filtered: Vec<UploadPart> = session.parts.into_iter().filter(|p| p.part_number > part_number_marker).collect();
        let truncated = filtered.len() > max_parts;
        Ok((filtered.into_iter().take(max_parts).collect(), truncated))
    }

    /// `ListMultipartUploads` (spec.md §4.8): scans every live session key,
    /// keeping those scoped to `bucket_id`, and walks C1's parent chain to
    /// compute each one's full key.
    pub async fn list_uploads_for_bucket(&self, bucket_id: Uuid) -> Result<Vec<(Uuid, String)>> {
        let keys = self.cache.keys_by_prefix(MULTIPART_SESSION_PREFIX).await?;
        let mut out = Vec::new();
        for key in keys {
            let Some(session) = get_json::<MultipartSession>(self.cache.as_ref(), &key).await? else {
                continue;
            };
            if session.bucket.id != bucket_id {
                continue;
            }
            let full_key = match session.parent_id {
                Some(parent_id) => format!("{}/{}", self.metadata.full_key_for(parent_id).await?, session.filename),
                None => session.filename.clone(),
            };
            out.push((session.upload_id, full_key));
        }
        out.sort();
        Ok(out)
    }
}

/// Streams an axum request body into `path` in [`STREAM_CHUNK_SIZE`] reads,
/// returning the total byte count (spec.md §4.8 "stream the request body
/// to a temp file in 1 MiB chunks").
pub async fn stream_body_to_file(body: Body, path: &Path) -> Result<i64> {
    let stream = body.into_data_stream().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(stream);
    let mut file = tokio::fs::File::create(path).await?;
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut total: i64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        total += n as i64;
    }
    file.flush().await?;
    Ok(total)
}

/// Appends raw bytes to an existing (or not-yet-existing) scratch file,
/// used by the file-request chunk step (C12) which must grow one file
/// across many requests rather than create it fresh.
pub async fn append_body_to_file(body: Body, path: &Path) -> Result<i64> {
    let stream = body.into_data_stream().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(stream);
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut total: i64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        total += n as i64;
    }
    file.flush().await?;
    Ok(total)
}
