use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel meaning "no limit" for any quota field. Never fold into
/// arithmetic without checking for it first (spec.md §9).
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub enabled: bool,
    pub is_admin: bool,
    pub storage_quota: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketAccess {
    Private,
    PublicRead,
    PublicWrite,
}

impl BucketAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketAccess::Private => "private",
            BucketAccess::PublicRead => "public-read",
            BucketAccess::PublicWrite => "public-write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(BucketAccess::Private),
            "public-read" => Some(BucketAccess::PublicRead),
            "public-write" => Some(BucketAccess::PublicWrite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub access: BucketAccess,
    pub storage_quota: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const FOLDER_MIME_TYPE: &str = "folder";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Object {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// A resolved path hit cached by C4, carrying the bucket snapshot needed by
/// callers so a second bucket lookup is never required after a cache hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedObject {
    pub object: Object,
    pub bucket: Bucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub description: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_api: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_key: String,
    pub secret_key: String,
    pub bucket_access: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BucketConfigType {
    String,
    Number,
    Boolean,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfigEntry {
    pub bucket_id: Uuid,
    pub key: String,
    pub value: String,
    pub config_type: BucketConfigType,
}

/// One part of an in-flight multipart upload (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPart {
    pub part_number: i32,
    pub path: String,
    pub etag: String,
}

/// Ephemeral multipart-upload state held in the KV cache (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartSession {
    pub upload_id: Uuid,
    pub bucket: Bucket,
    pub filename: String,
    pub parent_id: Option<Uuid>,
    pub temp_file_base: String,
    pub parts: Vec<UploadPart>,
    pub mime_type: String,
}

impl MultipartSession {
    pub fn part_path(&self, part_number: i32) -> String {
        self.temp_file_base.replace("{{partNumber}}", &part_number.to_string())
    }
}

/// Ephemeral file-request session held in the KV cache (C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    pub id: Uuid,
    pub bucket: Bucket,
    pub parent_id: Option<Uuid>,
    pub filename: Option<String>,
    pub user_id: Uuid,
    pub require_api_key: bool,
    pub created_at: DateTime<Utc>,
}

pub const FILE_REQUEST_TTL_SECONDS: u64 = 1800;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub bucket_id: Uuid,
    pub day: chrono::NaiveDate,
    pub api_requests: i64,
    pub s3_requests: i64,
    pub webdav_requests: i64,
    pub requests_count: i64,
    pub bytes_served: i64,
}
