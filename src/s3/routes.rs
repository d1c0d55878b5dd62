//! C11 routing table (spec.md §4.11). Nested under `/s3` by
//! `server::build_app`; dispatch on S3 verb + query params happens inside
//! each handler rather than in the router, matching the teacher's shape.

use crate::server::AppState;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(super::handlers::list_buckets))
        .route("/:bucket", get(super::handlers::bucket_get))
        .route("/:bucket", post(super::handlers::bucket_post))
        .route("/:bucket/*key", get(super::handlers::object_get))
        .route("/:bucket/*key", axum::routing::head(super::handlers::head_object))
        .route("/:bucket/*key", put(super::handlers::object_put))
        .route("/:bucket/*key", post(super::handlers::object_post))
        .route("/:bucket/*key", delete(super::handlers::object_delete))
}
