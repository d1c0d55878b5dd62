//! Public object API and image-transform surface (spec.md §1 external
//! collaborator interfaces, §4.10, §6 "external interfaces").
//!
//! No teacher equivalent for the folder-index JSON shape; grounded on the
//! teacher's plain-bytes `s3::handlers::get_object` for the read path and on
//! `transform.rs`/`principal.rs` for gating.

use crate::bucketconfig::BucketConfig;
use crate::error::{Error, JsonError};
use crate::models::{Bucket, BucketAccess};
use crate::principal;
use crate::readpath;
use crate::server::AppState;
use crate::stats::RequestKind;
use crate::transform::TransformParams;
use axum::extract::multipart::Multipart;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

type ApiResult = std::result::Result<Response, JsonError>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    name: String,
    access: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListedEntry {
    filename: String,
    is_folder: bool,
    size: i64,
    mime_type: String,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FolderIndex {
    bucket: BucketInfo,
    current_path: Option<String>,
    objects: Vec<ListedEntry>,
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Private buckets gate reads behind an API token (spec.md §4.10, applied
/// the same way to the sibling public object API).
async fn require_read_auth(state: &AppState, bucket: &Bucket, headers: &HeaderMap, query: &HashMap<String, String>) -> crate::error::Result<()> {
    if bucket.access == BucketAccess::Private {
        let token = principal::extract_token(headers, query);
        principal::authorize_private_bucket(state.principal.as_ref(), token.as_deref(), bucket.id).await?;
    }
    Ok(())
}

async fn serve_path(state: &Arc<AppState>, bucket_name: &str, path: &str, headers: &HeaderMap, query: &HashMap<String, String>) -> ApiResult {
    let bucket = state.metadata.find_bucket_by_name(bucket_name).await?.ok_or(Error::NoSuchBucket)?;
    require_read_auth(state, &bucket, headers, query).await?;

    let segments = split_segments(path);
    let config_rows = state.metadata.get_bucket_config(bucket.id).await?;
    let config = BucketConfig(&config_rows);

    let object = if segments.is_empty() {
        None
    } else {
        let resolved = state.resolver.resolve(&bucket.name, &segments).await?.ok_or(Error::NoSuchKey)?;
        Some(resolved.object)
    };

    let is_folder = object.as_ref().map(|o| o.is_folder()).unwrap_or(true);
    if is_folder {
        if !config.send_folder_index() {
            return Err(JsonError(Error::AccessDenied));
        }
        let parent_id = object.as_ref().map(|o| o.id);
        let children = state.metadata.list_children(bucket.id, parent_id).await?;
        let index = FolderIndex {
            bucket: BucketInfo { name: bucket.name.clone(), access: bucket.access.as_str() },
            current_path: if path.is_empty() { None } else { Some(path.to_string()) },
            objects: children
                .into_iter()
                .map(|o| ListedEntry { filename: o.filename, is_folder: o.is_folder(), size: o.size, mime_type: o.mime_type, updated_at: o.updated_at })
                .collect(),
        };
        return Ok(Json(index).into_response());
    }

    let object = object.expect("non-folder branch always has a resolved object");
    state.stats.record(bucket.id, RequestKind::Api, object.size).await;
    Ok(readpath::serve_object(&state.blob, &bucket.name, &object, headers, true).await?)
}

async fn object_root_get(State(state): State<Arc<AppState>>, Path(bucket_name): Path<String>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> ApiResult {
    serve_path(&state, &bucket_name, "", &headers, &query).await
}

async fn object_get(State(state): State<Arc<AppState>>, Path((bucket_name, path)): Path<(String, String)>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> ApiResult {
    serve_path(&state, &bucket_name, &path, &headers, &query).await
}

async fn upload_multipart_form(state: &Arc<AppState>, bucket_name: &str, folder_path: &str, mut multipart: Multipart) -> ApiResult {
    let bucket = state.metadata.find_bucket_by_name(bucket_name).await?.ok_or(Error::NoSuchBucket)?;
    if bucket.access != BucketAccess::PublicWrite {
        return Err(JsonError(Error::AccessDenied));
    }

    let folder_segments = split_segments(folder_path);
    let mut uploaded = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::InvalidRequest(e.to_string()))? {
        let filename = field.file_name().map(str::to_string).unwrap_or_else(|| "upload.bin".to_string());
        let content_type = field.content_type().map(str::to_string).unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = field.bytes().await.map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let mut segments: Vec<&str> = folder_segments.clone();
        segments.push(&filename);
        let obj = state.upload.put_object(&bucket, &segments, false, &content_type, bytes.into()).await?;
        state.stats.record(bucket.id, RequestKind::Api, obj.size).await;
        uploaded.push(ListedEntry { filename: obj.filename, is_folder: false, size: obj.size, mime_type: obj.mime_type, updated_at: obj.updated_at });
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "uploaded": uploaded }))).into_response())
}

async fn object_root_post(State(state): State<Arc<AppState>>, Path(bucket_name): Path<String>, multipart: Multipart) -> ApiResult {
    upload_multipart_form(&state, &bucket_name, "", multipart).await
}

async fn object_post(State(state): State<Arc<AppState>>, Path((bucket_name, path)): Path<(String, String)>, multipart: Multipart) -> ApiResult {
    upload_multipart_form(&state, &bucket_name, &path, multipart).await
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:bucket", get(object_root_get).post(object_root_post))
        .route("/:bucket/*path", get(object_get).post(object_post))
}

// ---- image transform (C10) ----

fn parse_transform_params(query: &HashMap<String, String>) -> TransformParams {
    TransformParams {
        width: query.get("width").and_then(|v| v.parse().ok()),
        height: query.get("height").and_then(|v| v.parse().ok()),
        format: query.get("format").cloned(),
        quality: query.get("quality").and_then(|v| v.parse().ok()),
    }
}

async fn transform_path(state: &Arc<AppState>, bucket_name: &str, path: &str, headers: &HeaderMap, query: &HashMap<String, String>) -> ApiResult {
    let bucket = state.metadata.find_bucket_by_name(bucket_name).await?.ok_or(Error::NoSuchBucket)?;
    let config_rows = state.metadata.get_bucket_config(bucket.id).await?;
    let config = BucketConfig(&config_rows);
    if !config.image_transform_enabled() {
        return Err(JsonError(Error::AccessDenied));
    }
    require_read_auth(state, &bucket, headers, query).await?;

    let segments = split_segments(path);
    let resolved = state.resolver.resolve(&bucket.name, &segments).await?.ok_or(Error::NoSuchKey)?;
    if resolved.object.is_folder() {
        return Err(JsonError(Error::NoSuchKey));
    }

    let params = parse_transform_params(query);
    let outcome = state.transform.transform(&bucket.name, &resolved.object, &params, &config).await?;
    state.stats.record(bucket.id, RequestKind::Api, outcome.bytes.len() as i64).await;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, outcome.content_type)
        .header("X-Cache", if outcome.from_cache { "HIT" } else { "MISS" })
        .body(axum::body::Body::from(outcome.bytes))
        .unwrap())
}

async fn transform_get(State(state): State<Arc<AppState>>, Path((bucket_name, path)): Path<(String, String)>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> ApiResult {
    transform_path(&state, &bucket_name, &path, &headers, &query).await
}

pub fn transform_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:bucket/*path", get(transform_get))
}
