use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the storage engine (spec.md §7). `status_code()` and
/// `error_code()` drive the S3 XML surface; `JsonError` wraps the same
/// variants for the public/file-request JSON surfaces.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Quota exceeded, upload reset")]
    QuotaExceededReset,

    #[error("Quota exceeded, upload canceled")]
    QuotaExceededCanceled,

    #[error("Bucket already exists")]
    BucketAlreadyExists,

    #[error("Bucket not empty")]
    BucketNotEmpty,

    #[error("Bucket not found")]
    NoSuchBucket,

    #[error("Object not found")]
    NoSuchKey,

    #[error("No such upload")]
    NoSuchUpload,

    #[error("No such file request")]
    NoSuchFileRequest,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid access key ID")]
    InvalidAccessKeyId,

    #[error("Missing credential")]
    Unauthorized,

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: i64 },

    #[error("Entity too large")]
    EntityTooLarge,

    #[error("Invalid part")]
    InvalidPart,

    #[error("Invalid part order")]
    InvalidPartOrder,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::AccessDenied => StatusCode::FORBIDDEN,
            Error::InvalidSignature => StatusCode::FORBIDDEN,
            Error::QuotaExceededReset | Error::QuotaExceededCanceled => StatusCode::FORBIDDEN,
            Error::BucketAlreadyExists => StatusCode::CONFLICT,
            Error::BucketNotEmpty => StatusCode::CONFLICT,
            Error::NoSuchBucket => StatusCode::NOT_FOUND,
            Error::NoSuchKey => StatusCode::NOT_FOUND,
            Error::NoSuchUpload => StatusCode::NOT_FOUND,
            Error::NoSuchFileRequest => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::InvalidAccessKeyId => StatusCode::UNAUTHORIZED,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::EntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::InvalidPart => StatusCode::BAD_REQUEST,
            Error::InvalidPartOrder => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            Error::AccessDenied => "AccessDenied",
            Error::InvalidSignature => "SignatureDoesNotMatch",
            Error::QuotaExceededReset | Error::QuotaExceededCanceled => "QuotaExceeded",
            Error::BucketAlreadyExists => "BucketAlreadyExists",
            Error::BucketNotEmpty => "BucketNotEmpty",
            Error::NoSuchBucket => "NoSuchBucket",
            Error::NoSuchKey => "NoSuchKey",
            Error::NoSuchUpload => "NoSuchUpload",
            Error::NoSuchFileRequest => "NoSuchFileRequest",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            Error::Unauthorized => "Unauthorized",
            Error::RangeNotSatisfiable { .. } => "InvalidRange",
            Error::EntityTooLarge => "EntityTooLarge",
            Error::InvalidPart => "InvalidPart",
            Error::InvalidPartOrder => "InvalidPartOrder",
            _ => "InternalError",
        }
    }

    /// A message safe to leak to clients. Internal/IO/DB detail is logged by
    /// the caller via `tracing::error!` and never echoed here.
    fn public_message(&self) -> String {
        match self {
            Error::Internal(_) | Error::Io(_) | Error::Database(_) | Error::Redis(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <RequestId>{}</RequestId>
</Error>"#,
            self.error_code(),
            xml_escape(&self.public_message()),
            uuid::Uuid::new_v4()
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.public_message(), "code": self.error_code() })
    }
}

/// Escapes the five XML predefined entities. Every user-supplied value that
/// lands in an S3 XML response must be run through this first.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if matches!(self, Error::Internal(_) | Error::Io(_) | Error::Database(_) | Error::Redis(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = self.status_code();
        let mut builder = Response::builder().status(status).header("Content-Type", "application/xml");
        if let Error::RangeNotSatisfiable { size } = &self {
            builder = builder.header("Content-Range", format!("bytes */{}", size));
        }
        builder.body(self.to_xml().into()).unwrap()
    }
}

/// Wraps [`Error`] for handlers on the public/file-request JSON surfaces.
pub struct JsonError(pub Error);

impl From<Error> for JsonError {
    fn from(e: Error) -> Self {
        JsonError(e)
    }
}

impl IntoResponse for JsonError {
    fn into_response(self) -> Response {
        if matches!(self.0, Error::Internal(_) | Error::Io(_) | Error::Database(_) | Error::Redis(_)) {
            tracing::error!(error = %self.0, "internal error");
        }
        (self.0.status_code(), axum::Json(self.0.to_json())).into_response()
    }
}
