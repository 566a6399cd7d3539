//! Duplicate candidate database operations
//!
//! Candidates are keyed on (staged_record_id, production_id), so re-running
//! detection inserts nothing new for pairings it already produced.

use chrono::Utc;
use qbank_common::db::models::{DuplicateCandidate, Resolution};
use qbank_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

const CANDIDATE_COLUMNS: &str = "id, staged_record_id, production_id, similarity_score, \
     resolution, resolution_notes, resolved_by, resolved_at, created_at";

pub(crate) fn from_row(row: &SqliteRow) -> Result<DuplicateCandidate> {
    let id: String = row.get("id");
    let staged_record_id: String = row.get("staged_record_id");
    let resolution: String = row.get("resolution");
    let created_at: String = row.get("created_at");
    Ok(DuplicateCandidate {
        id: super::parse_uuid(&id, "id")?,
        staged_record_id: super::parse_uuid(&staged_record_id, "staged_record_id")?,
        production_id: row.get("production_id"),
        similarity_score: row.get("similarity_score"),
        resolution: Resolution::parse(&resolution)?,
        resolution_notes: row.get("resolution_notes"),
        resolved_by: row.get("resolved_by"),
        resolved_at: super::parse_opt_timestamp(row.get("resolved_at"), "resolved_at")?,
        created_at: super::parse_timestamp(&created_at, "created_at")?,
    })
}

/// Insert detection results inside the detection transaction.
///
/// ON CONFLICT DO NOTHING keeps a retried detection run from duplicating
/// pairings or resetting resolutions already made on the first run.
pub async fn insert_all(
    tx: &mut Transaction<'_, Sqlite>,
    candidates: &[DuplicateCandidate],
) -> Result<u64> {
    let mut inserted = 0;
    for candidate in candidates {
        let result = sqlx::query(
            r#"
            INSERT INTO duplicate_candidates (
                id, staged_record_id, production_id, similarity_score,
                resolution, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (staged_record_id, production_id) DO NOTHING
            "#,
        )
        .bind(candidate.id.to_string())
        .bind(candidate.staged_record_id.to_string())
        .bind(&candidate.production_id)
        .bind(candidate.similarity_score)
        .bind(candidate.resolution.as_str())
        .bind(candidate.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

/// Load a candidate by id
pub async fn get(pool: &SqlitePool, candidate_id: Uuid) -> Result<Option<DuplicateCandidate>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM duplicate_candidates WHERE id = ?",
        CANDIDATE_COLUMNS
    ))
    .bind(candidate_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(from_row).transpose()
}

/// All candidates for one staged record, best match first
pub async fn list_by_record(
    pool: &SqlitePool,
    staged_record_id: Uuid,
) -> Result<Vec<DuplicateCandidate>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM duplicate_candidates
         WHERE staged_record_id = ? ORDER BY similarity_score DESC",
        CANDIDATE_COLUMNS
    ))
    .bind(staged_record_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

/// All candidates across a batch, best match first
pub async fn list_by_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<DuplicateCandidate>> {
    let rows = sqlx::query(
        "SELECT c.id, c.staged_record_id, c.production_id, c.similarity_score,
                c.resolution, c.resolution_notes, c.resolved_by, c.resolved_at,
                c.created_at
         FROM duplicate_candidates c
         JOIN staged_records r ON r.id = c.staged_record_id
         WHERE r.batch_id = ?
         ORDER BY c.similarity_score DESC",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

/// Record a reviewer's resolution on a still-pending candidate.
/// Returns false if the candidate was already resolved.
pub async fn resolve(
    pool: &SqlitePool,
    candidate_id: Uuid,
    resolution: Resolution,
    resolved_by: &str,
    notes: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE duplicate_candidates
         SET resolution = ?, resolution_notes = ?, resolved_by = ?, resolved_at = ?
         WHERE id = ? AND resolution = 'pending'",
    )
    .bind(resolution.as_str())
    .bind(notes)
    .bind(resolved_by)
    .bind(Utc::now().to_rfc3339())
    .bind(candidate_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Production ids from "replace" resolutions on one staged record; these
/// get superseded when the record imports
pub async fn replace_targets(pool: &SqlitePool, staged_record_id: Uuid) -> Result<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as(
        "SELECT production_id FROM duplicate_candidates
         WHERE staged_record_id = ? AND resolution = 'replace'",
    )
    .bind(staged_record_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Candidate count for a batch, total and still pending
pub async fn count_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<(i64, i64)> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM duplicate_candidates c
         JOIN staged_records r ON r.id = c.staged_record_id
         WHERE r.batch_id = ?",
    )
    .bind(batch_id.to_string())
    .fetch_one(pool)
    .await?;

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM duplicate_candidates c
         JOIN staged_records r ON r.id = c.staged_record_id
         WHERE r.batch_id = ? AND c.resolution = 'pending'",
    )
    .bind(batch_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok((total, pending))
}
