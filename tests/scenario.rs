//! End-to-end scenario tests (spec.md §8, S1-S6) driven straight through the
//! axum `Router` with `tower::ServiceExt::oneshot` — no bound socket, a
//! tempfile storage root, and an in-memory sqlite pool. Redis is skipped in
//! favor of the in-memory `KvCache` implementation, which C3's own contract
//! treats as a legitimate degraded-but-correct configuration.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;
use vaultbox::blob::BlobStore;
use vaultbox::config::{Config, DatabaseConfig, RedisConfig, ServerConfig, StorageConfig, TransformConfig};
use vaultbox::kv::memory::MemoryKvCache;
use vaultbox::kv::KvCache;
use vaultbox::metadata::MetadataStore;
use vaultbox::models::{BucketAccess, BucketConfigType};
use vaultbox::pathresolver::PathResolver;
use vaultbox::principal::{MetadataPrincipalResolver, PrincipalResolver};
use vaultbox::quota::QuotaEvaluator;
use vaultbox::server::{self, AppState};
use vaultbox::stats::StatsAggregator;
use vaultbox::transform::TransformEngine;
use vaultbox::upload::UploadEngine;

struct Harness {
    state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(MetadataStore::connect_memory().await.unwrap());
    let blob = Arc::new(BlobStore::new(&StorageConfig { path: dir.path().to_path_buf() }));
    blob.init().await.unwrap();
    let cache: Arc<dyn KvCache> = Arc::new(MemoryKvCache::new());
    let quota = Arc::new(QuotaEvaluator::new(metadata.clone()));
    let resolver = Arc::new(PathResolver::new(metadata.clone(), cache.clone()));
    let upload = Arc::new(UploadEngine::new(metadata.clone(), blob.clone(), quota.clone(), cache.clone(), resolver.clone()));
    let stats = Arc::new(StatsAggregator::new(metadata.clone()));
    let transform = Arc::new(TransformEngine::new(blob.clone(), cache.clone(), TransformConfig { max_quality: 100 }));
    let principal: Arc<dyn PrincipalResolver> = Arc::new(MetadataPrincipalResolver::new(metadata.clone()));

    let config = Config {
        server: ServerConfig { host: "0.0.0.0".into(), port: 9000, api_base_url: "http://localhost:9000".into() },
        storage: StorageConfig { path: dir.path().to_path_buf() },
        database: DatabaseConfig { url: "sqlite::memory:".into() },
        redis: RedisConfig { url: "redis://127.0.0.1:6379".into() },
        transform: TransformConfig { max_quality: 100 },
    };

    let state = Arc::new(AppState { config, metadata, blob, cache, quota, resolver, upload, stats, transform, principal });
    Harness { state, _dir: dir }
}

fn header(resp: &axum::http::Response<Body>, name: &str) -> String {
    resp.headers().get(name).unwrap().to_str().unwrap().to_string()
}

async fn body_string(resp: axum::http::Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn upload_id_from_xml(xml: &str) -> String {
    let start = xml.find("<UploadId>").unwrap() + "<UploadId>".len();
    let end = xml[start..].find("</UploadId>").unwrap() + start;
    xml[start..end].to_string()
}

#[tokio::test]
async fn s1_put_then_get_round_trips_bytes() {
    let h = harness().await;
    let metadata = h.state.metadata.clone();
    let user = metadata.create_user("alice", "hash", -1).await.unwrap();
    metadata.create_bucket("photos", user.id, BucketAccess::PublicWrite, -1).await.unwrap();
    let app = server::build_app(h.state.clone());

    let put = app
        .clone()
        .oneshot(Request::builder().method("PUT").uri("/s3/photos/a/b/c.jpg").body(Body::from("hello world")).unwrap())
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::OK);
    let put_etag = header(&put, "etag");

    let get = app
        .oneshot(Request::builder().method("GET").uri("/s3/photos/a/b/c.jpg").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(header(&get, "content-length"), "11");
    assert_eq!(header(&get, "etag"), put_etag);
    assert_eq!(body_string(get).await, "hello world");
}

#[tokio::test]
async fn s2_range_request_returns_partial_content() {
    let h = harness().await;
    let metadata = h.state.metadata.clone();
    let user = metadata.create_user("alice", "hash", -1).await.unwrap();
    metadata.create_bucket("photos", user.id, BucketAccess::PublicWrite, -1).await.unwrap();
    let app = server::build_app(h.state.clone());

    app.clone()
        .oneshot(Request::builder().method("PUT").uri("/s3/photos/c.jpg").body(Body::from("hello world")).unwrap())
        .await
        .unwrap();

    let ranged = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s3/photos/c.jpg")
                .header("range", "bytes=6-10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&ranged, "content-range"), "bytes 6-10/11");
    assert_eq!(body_string(ranged).await, "world");
}

#[tokio::test]
async fn s3_multipart_upload_concatenates_parts_in_order() {
    let h = harness().await;
    let metadata = h.state.metadata.clone();
    let user = metadata.create_user("alice", "hash", -1).await.unwrap();
    metadata.create_bucket("photos", user.id, BucketAccess::PublicWrite, -1).await.unwrap();
    let app = server::build_app(h.state.clone());

    let init = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/s3/photos/big.bin?uploads").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(init.status(), StatusCode::OK);
    let upload_id = upload_id_from_xml(&body_string(init).await);

    let part2 = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/s3/photos/big.bin?partNumber=2&uploadId={upload_id}"))
                .body(Body::from("world"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(part2.status(), StatusCode::OK);

    let part1 = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/s3/photos/big.bin?partNumber=1&uploadId={upload_id}"))
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(part1.status(), StatusCode::OK);

    let complete = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/s3/photos/big.bin?uploadId={upload_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(complete.status(), StatusCode::OK);

    let get = app
        .oneshot(Request::builder().method("GET").uri("/s3/photos/big.bin").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(header(&get, "content-length"), "10");
    assert_eq!(body_string(get).await, "helloworld");
}

#[tokio::test]
async fn s4_quota_refusal_leaves_no_scratch_and_no_usage() {
    let h = harness().await;
    let metadata = h.state.metadata.clone();
    let user = metadata.create_user("alice", "hash", -1).await.unwrap();
    metadata.create_bucket("tiny", user.id, BucketAccess::PublicWrite, 5).await.unwrap();
    let app = server::build_app(h.state.clone());

    let put = app
        .oneshot(Request::builder().method("PUT").uri("/s3/tiny/a.txt").body(Body::from("too-long")).unwrap())
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::FORBIDDEN);

    let bucket = metadata.find_bucket_by_name("tiny").await.unwrap().unwrap();
    assert_eq!(metadata.aggregate_usage_by_bucket(bucket.id).await.unwrap(), 0);

    let mut entries = tokio::fs::read_dir(h.state.blob.temp_dir()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn s5_list_objects_groups_by_delimiter() {
    let h = harness().await;
    let metadata = h.state.metadata.clone();
    let user = metadata.create_user("alice", "hash", -1).await.unwrap();
    metadata.create_bucket("photos", user.id, BucketAccess::PublicWrite, -1).await.unwrap();
    let app = server::build_app(h.state.clone());

    for (key, body) in [("a/b.txt", "1"), ("a/c.txt", "2"), ("d.txt", "3")] {
        let resp = app.clone().oneshot(Request::builder().method("PUT").uri(format!("/s3/photos/{key}")).body(Body::from(body)).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let list = app
        .oneshot(Request::builder().method("GET").uri("/s3/photos?list-type=2&prefix=&delimiter=/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    let xml = body_string(list).await;
    assert!(xml.contains("<CommonPrefixes>"));
    assert!(xml.contains("<Prefix>a/</Prefix>"));
    assert!(xml.contains("<Key>d.txt</Key>"));
    assert!(!xml.contains("<Key>a/b.txt</Key>"));
}

#[tokio::test]
async fn s6_path_cache_is_stale_but_bounded() {
    let h = harness().await;
    let metadata = h.state.metadata.clone();
    let user = metadata.create_user("alice", "hash", -1).await.unwrap();
    let bucket = metadata.create_bucket("photos", user.id, BucketAccess::PublicWrite, -1).await.unwrap();
    metadata.set_bucket_config(bucket.id, "cache_path_caching_enable", "true", BucketConfigType::Boolean).await.unwrap();
    metadata.set_bucket_config(bucket.id, "cache_path_caching_ttl_seconds", "2", BucketConfigType::Number).await.unwrap();
    let app = server::build_app(h.state.clone());

    app.clone()
        .oneshot(Request::builder().method("PUT").uri("/s3/photos/x/y").body(Body::from("orig")).unwrap())
        .await
        .unwrap();

    // Warm the path cache.
    let first = app.clone().oneshot(Request::builder().method("GET").uri("/s3/photos/x/y").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Rename directly in metadata, bypassing the cache invalidation `upload.rs` would normally trigger.
    sqlx::query("UPDATE objects SET filename = 'y2' WHERE filename = 'y'").execute(metadata.pool()).await.unwrap();

    let within_ttl = app.clone().oneshot(Request::builder().method("GET").uri("/s3/photos/x/y").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(within_ttl.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    let after_ttl = app.oneshot(Request::builder().method("GET").uri("/s3/photos/x/y").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(after_ttl.status(), StatusCode::NOT_FOUND);
}
