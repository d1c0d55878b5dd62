//! C12 — file-request protocol: short-lived, token-scoped out-of-band
//! chunked upload (spec.md §4.12).
//!
//! No teacher equivalent. Grounded on the upload engine's scratch-file
//! append/rename idiom (C8, `upload::append_body_to_file`) and the
//! teacher's hand-built string responses in `s3/xml.rs` for the generated
//! shell/PowerShell/batch scripts.

use crate::error::{Error, JsonError, Result};
use crate::kv::{get_json, set_json};
use crate::models::{FileRequest, FILE_REQUEST_TTL_SECONDS};
use crate::principal;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

type ApiResult = std::result::Result<Response, JsonError>;

fn session_key(id: Uuid) -> String {
    format!("filereq:{}", id)
}

async fn load_session(state: &AppState, id: Uuid) -> Result<FileRequest> {
    get_json::<FileRequest>(state.cache.as_ref(), &session_key(id)).await?.ok_or(Error::NoSuchFileRequest)
}

async fn save_session(state: &AppState, session: &FileRequest) -> Result<()> {
    set_json(state.cache.as_ref(), &session_key(session.id), session, FILE_REQUEST_TTL_SECONDS).await
}

fn scratch_path(state: &AppState, id: Uuid) -> PathBuf {
    state.blob.temp_dir().join(format!("multipart_{}", id))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidArgument("invalid file-request id".into()))
}

/// Validates `X-Api-Key` against the session's owner when the creator
/// required one (spec.md §4.12 step 1/2 "validates ... API key (if
/// required)").
async fn check_api_key(state: &AppState, session: &FileRequest, headers: &HeaderMap) -> Result<()> {
    if !session.require_api_key {
        return Ok(());
    }
    let key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).ok_or(Error::Unauthorized)?;
    let user = state.principal.resolve(key).await?.ok_or(Error::Unauthorized)?;
    if user.id != session.user_id {
        return Err(Error::AccessDenied);
    }
    Ok(())
}

fn mime_from_extension(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

// ---- session creation ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    bucket: String,
    parent: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    require_api_key: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: Uuid,
    bucket: String,
    parent: Option<String>,
    filename: Option<String>,
    require_api_key: bool,
    created_at: DateTime<Utc>,
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

async fn create_session(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateSessionRequest>) -> ApiResult {
    let bucket = state.metadata.find_bucket_by_name(&req.bucket).await?.ok_or(Error::NoSuchBucket)?;
    let token = principal::extract_token(&headers, &HashMap::new());
    let user = principal::authorize_private_bucket(state.principal.as_ref(), token.as_deref(), bucket.id).await?;

    let parent_id = match req.parent.as_deref() {
        Some(p) if !p.is_empty() => {
            let segments = split_segments(p);
            let resolved = state.resolver.resolve(&bucket.name, &segments).await?.ok_or(Error::NoSuchKey)?;
            if !resolved.object.is_folder() {
                return Err(JsonError(Error::InvalidArgument("parent is not a folder".into())));
            }
            Some(resolved.object.id)
        }
        _ => None,
    };

    let session = FileRequest {
        id: Uuid::new_v4(),
        bucket: bucket.clone(),
        parent_id,
        filename: req.filename.clone(),
        user_id: user.id,
        require_api_key: req.require_api_key,
        created_at: Utc::now(),
    };
    save_session(&state, &session).await?;

    Ok((
        StatusCode::OK,
        Json(SessionResponse {
            id: session.id,
            bucket: bucket.name,
            parent: req.parent,
            filename: session.filename,
            require_api_key: session.require_api_key,
            created_at: session.created_at,
        }),
    )
        .into_response())
}

// ---- script generation ----

fn script_sh(base_url: &str, id: Uuid, require_api_key: bool) -> String {
    let api_key_flag = if require_api_key { " --api-key \"$API_KEY\"" } else { "" };
    format!(
        r#"#!/bin/sh
set -e
BASE_URL="{base_url}"
ID="{id}"
CHUNK_SIZE=$((20*1024*1024))
FILE=""
SAVE_AS=""
QUIET=0
API_KEY=""

while [ $# -gt 0 ]; do
  case "$1" in
    --file) FILE="$2"; shift 2 ;;
    --save-as) SAVE_AS="$2"; shift 2 ;;
    --quiet) QUIET=1; shift ;;
    --chunk-size) CHUNK_SIZE=$(($2*1024*1024)); shift 2 ;;
    --api-key) API_KEY="$2"; shift 2 ;;
    *) shift ;;
  esac
done

[ -z "$FILE" ] && echo "usage: $0 --file <path> [--save-as name] [--quiet] [--chunk-size MB]{api_key_flag}" && exit 1
NAME="${{SAVE_AS:-$(basename "$FILE")}}"

curl -sf -X POST "$BASE_URL/api/filereq/$ID/upload" -H "X-Filename: $NAME"{api_key_flag} > /dev/null

split -b "$CHUNK_SIZE" "$FILE" /tmp/filereq_chunk_
for part in /tmp/filereq_chunk_*; do
  curl -sf -X PUT "$BASE_URL/api/filereq/$ID/upload" --data-binary "@$part"{api_key_flag} > /dev/null
  [ "$QUIET" = 0 ] && echo "uploaded chunk: $part"
  rm -f "$part"
done

curl -sf -X POST "$BASE_URL/api/filereq/$ID/upload/complete"{api_key_flag} > /dev/null
[ "$QUIET" = 0 ] && echo "upload complete: $NAME"
"#,
        base_url = base_url,
        id = id,
        api_key_flag = api_key_flag,
    )
}

fn script_ps1(base_url: &str, id: Uuid, require_api_key: bool) -> String {
    let api_key_header = if require_api_key { r#"@{ "X-Api-Key" = $ApiKey }"# } else { "@{}" };
    format!(
        r#"param(
    [Parameter(Mandatory=$true)][string]$File,
    [string]$SaveAs,
    [switch]$Quiet,
    [int]$ChunkSize = 20,
    [string]$ApiKey
)
$BaseUrl = "{base_url}"
$Id = "{id}"
$Name = if ($SaveAs) {{ $SaveAs }} else {{ Split-Path $File -Leaf }}
$Headers = {api_key_header}

Invoke-RestMethod -Method Post -Uri "$BaseUrl/api/filereq/$Id/upload" -Headers ($Headers + @{{ "X-Filename" = $Name }}) | Out-Null

$chunkBytes = $ChunkSize * 1MB
$stream = [System.IO.File]::OpenRead($File)
$buffer = New-Object byte[] $chunkBytes
while (($read = $stream.Read($buffer, 0, $buffer.Length)) -gt 0) {{
    $chunk = $buffer[0..($read - 1)]
    Invoke-RestMethod -Method Put -Uri "$BaseUrl/api/filereq/$Id/upload" -Headers $Headers -Body $chunk | Out-Null
    if (-not $Quiet) {{ Write-Host "uploaded chunk of $read bytes" }}
}}
$stream.Close()

Invoke-RestMethod -Method Post -Uri "$BaseUrl/api/filereq/$Id/upload/complete" -Headers $Headers | Out-Null
if (-not $Quiet) {{ Write-Host "upload complete: $Name" }}
"#,
        base_url = base_url,
        id = id,
        api_key_header = api_key_header,
    )
}

fn script_bat(base_url: &str, id: Uuid, require_api_key: bool) -> String {
    let api_key_note = if require_api_key { "REM pass --api-key <token> when the session requires one" } else { "" };
    format!(
        r#"@echo off
setlocal
set BASE_URL={base_url}
set ID={id}
set FILE=%1
set SAVE_AS=%2
{api_key_note}

curl -sf -X POST "%BASE_URL%/api/filereq/%ID%/upload" -H "X-Filename: %SAVE_AS%" > nul
curl -sf -X PUT "%BASE_URL%/api/filereq/%ID%/upload" --data-binary "@%FILE%" > nul
curl -sf -X POST "%BASE_URL%/api/filereq/%ID%/upload/complete" > nul
echo upload complete: %SAVE_AS%
"#,
        base_url = base_url,
        id = id,
        api_key_note = api_key_note,
    )
}

async fn script_handler(State(state): State<Arc<AppState>>, Path((id, kind)): Path<(String, String)>) -> ApiResult {
    let id = parse_id(&id)?;
    let session = load_session(&state, id).await?;
    let base_url = &state.config.server.api_base_url;
    let body = match kind.as_str() {
        "sh" => script_sh(base_url, id, session.require_api_key),
        "ps1" => script_ps1(base_url, id, session.require_api_key),
        "bat" => script_bat(base_url, id, session.require_api_key),
        _ => return Err(JsonError(Error::InvalidRequest("unknown script kind".into()))),
    };
    Ok((StatusCode::OK, [("Content-Type", "text/plain; charset=utf-8")], body).into_response())
}

// ---- three-step upload ----

async fn upload_initiate(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap) -> ApiResult {
    let id = parse_id(&id)?;
    let mut session = load_session(&state, id).await?;
    check_api_key(&state, &session, &headers).await?;

    if session.filename.is_none() {
        let filename = headers.get("x-filename").and_then(|v| v.to_str().ok()).ok_or_else(|| Error::InvalidRequest("missing X-Filename".into()))?;
        session.filename = Some(filename.to_string());
    }
    save_session(&state, &session).await?;

    let path = scratch_path(&state, id);
    tokio::fs::File::create(&path).await.map_err(Error::from)?;
    Ok(StatusCode::OK.into_response())
}

async fn upload_chunk(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap, body: axum::body::Body) -> ApiResult {
    let id = parse_id(&id)?;
    let session = load_session(&state, id).await?;
    check_api_key(&state, &session, &headers).await?;

    let path = scratch_path(&state, id);
    let current_size = tokio::fs::metadata(&path).await.map(|m| m.len() as i64).unwrap_or(0);
    let incoming = headers.get(axum::http::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);

    if !state.quota.check(&session.bucket, current_size + incoming).await? {
        let _ = tokio::fs::File::create(&path).await;
        return Err(JsonError(Error::QuotaExceededCanceled));
    }

    crate::upload::append_body_to_file(body, &path).await?;
    let key = session_key(id);
    state.cache.expire(&key, FILE_REQUEST_TTL_SECONDS).await?;
    Ok(StatusCode::OK.into_response())
}

async fn upload_complete(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap) -> ApiResult {
    let id = parse_id(&id)?;
    let session = load_session(&state, id).await?;
    check_api_key(&state, &session, &headers).await?;

    let path = scratch_path(&state, id);
    let size = tokio::fs::metadata(&path).await.map(|m| m.len() as i64).map_err(Error::from)?;
    if !state.quota.check(&session.bucket, size).await? {
        return Err(JsonError(Error::QuotaExceededCanceled));
    }

    let filename = session.filename.clone().ok_or_else(|| Error::InvalidRequest("session has no filename".into()))?;
    let mime_type = mime_from_extension(&filename);
    let obj = state
        .metadata
        .find_or_create_object(session.bucket.id, session.parent_id, &filename, mime_type, size)
        .await?;
    state.blob.publish(&session.bucket.name, obj.id, &path).await?;
    state.quota.record_committed(&session.bucket, size).await;

    state.cache.delete(&session_key(id)).await?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "objectId": obj.id, "filename": obj.filename, "size": obj.size }))).into_response())
}

async fn cancel_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    let path = scratch_path(&state, id);
    let _ = tokio::fs::remove_file(&path).await;
    state.cache.delete(&session_key(id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_session))
        .route("/:id/:kind", get(script_handler))
        .route("/:id/upload", post(upload_initiate).put(upload_chunk))
        .route("/:id/upload/complete", post(upload_complete))
        .route("/:id", delete(cancel_session))
}
