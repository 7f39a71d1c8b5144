//! cardvault-scan library interface
//!
//! Card photo scanning service: text detection, title extraction, catalog
//! verification, expiring upload batches and durable collections. Exposed
//! as a library so integration tests can build the router with fake
//! external services.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod text;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use cardvault_common::Clock;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenVerifier;
use crate::config::{ServiceConfig, UploadConfig};
use crate::services::{
    BatchAggregator, BatchLifetimes, CandidateResolver, CollectionStore, ImagePreprocessor,
    ScanPipeline,
};
use crate::types::{CardCatalog, TextDetector};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub pipeline: ScanPipeline,
    pub batches: Arc<BatchAggregator>,
    pub collections: Arc<CollectionStore>,
    pub tokens: Arc<TokenVerifier>,
    /// Accept callers without a bearer token on `MaybeUser` routes
    pub allow_anonymous: bool,
    pub uploads: UploadConfig,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server error, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire every service from configuration and the external collaborators
    pub fn new(
        db: SqlitePool,
        config: &ServiceConfig,
        detector: Arc<dyn TextDetector>,
        catalog: Arc<dyn CardCatalog>,
        clock: Arc<dyn Clock>,
        tokens: TokenVerifier,
    ) -> Self {
        let resolver = CandidateResolver::new(catalog)
            .with_threshold(config.catalog.confidence_threshold)
            .with_timeout(config.catalog.timeout());

        let mut pipeline = ScanPipeline::new(detector, Arc::new(resolver))
            .with_ocr_timeout(config.vision.timeout());
        if config.vision.preprocess {
            pipeline = pipeline.with_preprocessor(ImagePreprocessor::new(config.vision.max_dimension));
        }

        let batches = Arc::new(BatchAggregator::new(
            db.clone(),
            clock.clone(),
            BatchLifetimes {
                anonymous: config.batches.anonymous_ttl(),
                owned: config.batches.owned_ttl(),
            },
        ));

        let collections = Arc::new(CollectionStore::new(
            db.clone(),
            clock,
            batches.clone(),
            config.collections.anonymous_ttl(),
        ));

        Self {
            db,
            pipeline,
            batches,
            collections,
            tokens: Arc::new(tokens),
            allow_anonymous: config.auth.allow_anonymous,
            uploads: config.uploads.clone(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::scan_routes(&state))
        .merge(api::batch_routes(&state))
        .merge(api::collection_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            api::track_last_error,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
