//! Wires every subsystem into one `Arc<AppState>` and serves it over HTTP
//! (spec.md §5 "each request handled on an independent task... shared
//! mutable data structures... the metadata store, blob store, KV cache,
//! stats counters").
//!
//! Grounded on the teacher's `server.rs` (`AppState`/`build_app`/graceful
//! shutdown), extended with the startup `.temp` purge and the stats
//! flush-loop spawn spec.md requires.

use crate::blob::BlobStore;
use crate::config::Config;
use crate::error::Result;
use crate::kv::{KvCache, RedisKvCache};
use crate::metadata::MetadataStore;
use crate::pathresolver::PathResolver;
use crate::principal::{MetadataPrincipalResolver, PrincipalResolver};
use crate::quota::QuotaEvaluator;
use crate::sigv4::SigV4Verifier;
use crate::stats::StatsAggregator;
use crate::transform::TransformEngine;
use crate::upload::UploadEngine;
use axum::Router;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub config: Config,
    pub metadata: Arc<MetadataStore>,
    pub blob: Arc<BlobStore>,
    pub cache: Arc<dyn KvCache>,
    pub quota: Arc<QuotaEvaluator>,
    pub resolver: Arc<PathResolver>,
    pub upload: Arc<UploadEngine>,
    pub stats: Arc<StatsAggregator>,
    pub transform: Arc<TransformEngine>,
    pub principal: Arc<dyn PrincipalResolver>,
}

impl AppState {
    pub fn sigv4(&self) -> SigV4Verifier<'_> {
        SigV4Verifier::new(&self.metadata)
    }
}

pub async fn run(config: Config) -> Result<()> {
    let metadata = Arc::new(MetadataStore::connect(&config).await?);
    let blob = Arc::new(BlobStore::new(&config.storage));
    blob.init().await?;

    let cache: Arc<dyn KvCache> = Arc::new(RedisKvCache::connect(&config).await?);
    let quota = Arc::new(QuotaEvaluator::new(metadata.clone()));
    let resolver = Arc::new(PathResolver::new(metadata.clone(), cache.clone()));
    let upload = Arc::new(UploadEngine::new(metadata.clone(), blob.clone(), quota.clone(), cache.clone(), resolver.clone()));
    let stats = Arc::new(StatsAggregator::new(metadata.clone()));
    let transform = Arc::new(TransformEngine::new(blob.clone(), cache.clone(), config.transform.clone()));
    let principal: Arc<dyn PrincipalResolver> = Arc::new(MetadataPrincipalResolver::new(metadata.clone()));

    let state = Arc::new(AppState {
        config: config.clone(),
        metadata,
        blob,
        cache,
        quota,
        resolver,
        upload,
        stats: stats.clone(),
        transform,
        principal,
    });

    tokio::spawn(stats.run_flush_loop());

    let app = build_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("vaultbox listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/s3", crate::s3::routes::create_routes())
        .nest("/api/storage", crate::api::routes())
        .nest("/transform", crate::api::transform_routes())
        .nest("/api/filereq", crate::filereq::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received terminate signal, shutting down");
        },
    }
}
