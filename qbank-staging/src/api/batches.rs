//! Batch staging, review and import endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qbank_common::db::models::{
    BatchStatus, DuplicateCandidate, RecordStatus, StagedRecord, UploadBatch,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::services::{
    DetectionOutcome, DuplicateDetector, ImportOutcome, Importer, NewBatch, ReviewCoordinator,
    ReviewOutcome, StagingService,
};
use crate::services::review::ReviewAction;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

/// Build batch staging routes
pub fn staging_routes() -> Router<AppState> {
    Router::new()
        .route("/staging/batches", post(create_batch).get(list_batches))
        .route("/staging/batches/:id", get(get_batch))
        .route("/staging/batches/:id/records", get(list_records))
        .route("/staging/batches/:id/detect", post(detect_duplicates))
        .route("/staging/batches/:id/review", post(review_records))
        .route("/staging/batches/:id/import", post(import_batch))
        .route("/staging/batches/:id/cancel", post(cancel_batch))
        .route("/staging/batches/:id/duplicates", get(list_duplicates))
}

/// POST /staging/batches
///
/// Create a batch and stage all submitted records in one transaction.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(submission): Json<NewBatch>,
) -> ApiResult<(StatusCode, Json<UploadBatch>)> {
    let batch = StagingService::new(state.db.clone())
        .create_batch(submission)
        .await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    pub status: Option<BatchStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchListResponse {
    pub batches: Vec<UploadBatch>,
    pub total: i64,
    pub pending: i64,
    pub reviewing: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /staging/batches?status=&limit=&offset=
pub async fn list_batches(
    State(state): State<AppState>,
    Query(params): Query<ListBatchesParams>,
) -> ApiResult<Json<BatchListResponse>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let batches = db::batches::list(&state.db, params.status, limit, offset).await?;
    let counts = db::batches::status_counts(&state.db).await?;

    Ok(Json(BatchListResponse {
        batches,
        total: counts.total,
        pending: counts.pending,
        reviewing: counts.reviewing,
        completed: counts.completed,
        cancelled: counts.cancelled,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize)]
pub struct BatchDetailResponse {
    pub batch: UploadBatch,
    pub records: Vec<StagedRecord>,
    pub candidates: Vec<DuplicateCandidate>,
    pub statistics: std::collections::BTreeMap<String, i64>,
}

/// GET /staging/batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchDetailResponse>> {
    let batch = db::batches::get(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {} not found", batch_id)))?;
    let records = db::records::list_by_batch(&state.db, batch_id, None).await?;
    let candidates = db::candidates::list_by_batch(&state.db, batch_id).await?;
    let statistics = db::records::status_statistics(&state.db, batch_id).await?;

    Ok(Json(BatchDetailResponse {
        batch,
        records,
        candidates,
        statistics,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListRecordsParams {
    pub status: Option<RecordStatus>,
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub batch_id: Uuid,
    pub records: Vec<StagedRecord>,
}

/// GET /staging/batches/{id}/records?status=
pub async fn list_records(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Query(params): Query<ListRecordsParams>,
) -> ApiResult<Json<RecordListResponse>> {
    if db::batches::get(&state.db, batch_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Batch {} not found", batch_id)));
    }
    let records = db::records::list_by_batch(&state.db, batch_id, params.status).await?;
    Ok(Json(RecordListResponse { batch_id, records }))
}

/// POST /staging/batches/{id}/detect
pub async fn detect_duplicates(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<DetectionOutcome>> {
    let outcome = DuplicateDetector::new(state.db.clone(), &state.detection)
        .run(batch_id)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub record_ids: Vec<Uuid>,
    pub action: ReviewAction,
    pub reviewed_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /staging/batches/{id}/review
pub async fn review_records(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Json<ReviewOutcome>> {
    let outcome = ReviewCoordinator::new(state.db.clone())
        .review_records(
            batch_id,
            &request.record_ids,
            request.action,
            &request.reviewed_by,
            request.notes.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub imported_by: String,
}

/// POST /staging/batches/{id}/import
///
/// Imports serialize through a process-level lock; a second concurrent
/// call is refused rather than queued.
pub async fn import_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<Json<ImportOutcome>> {
    let _guard = state
        .import_lock
        .try_lock()
        .map_err(|_| ApiError::Conflict("Another import is already running".to_string()))?;

    let outcome = Importer::new(state.db.clone())
        .import_batch(batch_id, &request.imported_by)
        .await?;
    Ok(Json(outcome))
}

/// POST /staging/batches/{id}/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<UploadBatch>> {
    let batch = StagingService::new(state.db.clone())
        .cancel_batch(batch_id)
        .await?;
    Ok(Json(batch))
}

#[derive(Debug, Serialize)]
pub struct DuplicateListResponse {
    pub batch_id: Uuid,
    pub candidates: Vec<DuplicateCandidate>,
}

/// GET /staging/batches/{id}/duplicates
pub async fn list_duplicates(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<DuplicateListResponse>> {
    if db::batches::get(&state.db, batch_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Batch {} not found", batch_id)));
    }
    let candidates = db::candidates::list_by_batch(&state.db, batch_id).await?;
    Ok(Json(DuplicateListResponse {
        batch_id,
        candidates,
    }))
}
