//! Duplicate candidate resolution endpoint

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use qbank_common::db::models::Resolution;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::review::ResolveOutcome;
use crate::services::ReviewCoordinator;
use crate::AppState;

/// Build duplicate resolution routes
pub fn duplicate_routes() -> Router<AppState> {
    Router::new().route("/staging/duplicates/:id/resolve", post(resolve_duplicate))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution: Resolution,
    pub resolved_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /staging/duplicates/{id}/resolve
pub async fn resolve_duplicate(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveOutcome>> {
    let outcome = ReviewCoordinator::new(state.db.clone())
        .resolve_duplicate(
            candidate_id,
            request.resolution,
            &request.resolved_by,
            request.notes.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}
