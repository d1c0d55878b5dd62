//! Maps a bearer token to a user and its accessible buckets (spec.md §1,
//! §3 "Credential... ApiToken... bearer tokens scoped to one user, all of
//! that user's buckets"). The public object API and file-request surfaces
//! authenticate through this rather than through C7.
//!
//! No teacher equivalent; grounded on `metadata.rs`'s `find_api_token_user`
//! and `list_buckets_for_owner`, which already carry everything this trait
//! needs.

use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::models::User;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Resolves a bearer token to its owning user. `Ok(None)` means the
    /// token is unknown, expired, or disabled.
    async fn resolve(&self, token: &str) -> Result<Option<User>>;

    /// True if `user_id` may read/write `bucket_id` — currently "owns the
    /// bucket", since API tokens are scoped to all of one user's buckets
    /// (spec.md §3).
    async fn can_access_bucket(&self, user_id: Uuid, bucket_id: Uuid) -> Result<bool>;
}

pub struct MetadataPrincipalResolver {
    metadata: Arc<MetadataStore>,
}

impl MetadataPrincipalResolver {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl PrincipalResolver for MetadataPrincipalResolver {
    async fn resolve(&self, token: &str) -> Result<Option<User>> {
        let Some(user_id) = self.metadata.find_api_token_user(token).await? else {
            return Ok(None);
        };
        let user = self.metadata.find_user_by_id(user_id).await?;
        Ok(user.filter(|u| u.enabled))
    }

    async fn can_access_bucket(&self, user_id: Uuid, bucket_id: Uuid) -> Result<bool> {
        let bucket = self.metadata.find_bucket_by_id(bucket_id).await?;
        Ok(bucket.map(|b| b.owner_id == user_id).unwrap_or(false))
    }
}

/// Extracts a bearer token from `?token=` or `Authorization: Bearer <..>`
/// (spec.md §6 "Private buckets require an API token").
pub fn extract_token(headers: &axum::http::HeaderMap, query: &std::collections::HashMap<String, String>) -> Option<String> {
    if let Some(token) = query.get("token") {
        return Some(token.clone());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Resolves the token and confirms it grants `bucket_id`, or returns the
/// appropriate [`Error`] for a private-bucket gate.
pub async fn authorize_private_bucket(
    resolver: &dyn PrincipalResolver,
    token: Option<&str>,
    bucket_id: Uuid,
) -> Result<User> {
    let token = token.ok_or(Error::Unauthorized)?;
    let user = resolver.resolve(token).await?.ok_or(Error::Unauthorized)?;
    if !resolver.can_access_bucket(user.id, bucket_id).await? {
        return Err(Error::AccessDenied);
    }
    Ok(user)
}
