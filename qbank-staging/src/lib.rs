//! qbank-staging - Question Staging & Review Service
//!
//! Accepts bulk question submissions, stages them for human review,
//! detects likely duplicates against the production corpus via trigram
//! similarity, and promotes reviewed, conflict-free questions into
//! production exactly once each.

pub mod api;
pub mod db;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use qbank_common::config::DetectionConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Duplicate detection policy (threshold, topic scoping)
    pub detection: DetectionConfig,
    /// Single-writer guard for imports: two concurrent import calls must
    /// not both proceed (the per-record status guard is only a safety net)
    pub import_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: SqlitePool, detection: DetectionConfig) -> Self {
        Self {
            db,
            detection,
            import_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::staging_routes())
        .merge(api::duplicate_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
