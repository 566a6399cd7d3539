//! Staged record database operations
//!
//! All status transitions are guarded by the expected current status in
//! the WHERE clause. A return of false means the record had already moved
//! on; callers re-fetch and report the conflict rather than retrying
//! blindly.

use chrono::Utc;
use qbank_common::db::models::{RecordStatus, StagedRecord};
use qbank_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, batch_id, position, topic, subtopic, difficulty, qtype, \
     question_text, answer_text, notes, status, duplicate_of, similarity_score, \
     review_notes, reviewed_by, reviewed_at, canonical_id, created_at";

pub(crate) fn from_row(row: &SqliteRow) -> Result<StagedRecord> {
    let id: String = row.get("id");
    let batch_id: String = row.get("batch_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    Ok(StagedRecord {
        id: super::parse_uuid(&id, "id")?,
        batch_id: super::parse_uuid(&batch_id, "batch_id")?,
        position: row.get("position"),
        topic: row.get("topic"),
        subtopic: row.get("subtopic"),
        difficulty: row.get("difficulty"),
        qtype: row.get("qtype"),
        question_text: row.get("question_text"),
        answer_text: row.get("answer_text"),
        notes: row.get("notes"),
        status: RecordStatus::parse(&status)?,
        duplicate_of: row.get("duplicate_of"),
        similarity_score: row.get("similarity_score"),
        review_notes: row.get("review_notes"),
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: super::parse_opt_timestamp(row.get("reviewed_at"), "reviewed_at")?,
        canonical_id: row.get("canonical_id"),
        created_at: super::parse_timestamp(&created_at, "created_at")?,
    })
}

/// Insert a staged record inside the staging transaction
pub async fn insert(tx: &mut Transaction<'_, Sqlite>, record: &StagedRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO staged_records (
            id, batch_id, position, topic, subtopic, difficulty, qtype,
            question_text, answer_text, notes, status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.batch_id.to_string())
    .bind(record.position)
    .bind(&record.topic)
    .bind(&record.subtopic)
    .bind(&record.difficulty)
    .bind(&record.qtype)
    .bind(&record.question_text)
    .bind(&record.answer_text)
    .bind(&record.notes)
    .bind(record.status.as_str())
    .bind(record.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Load a record by id
pub async fn get(pool: &SqlitePool, record_id: Uuid) -> Result<Option<StagedRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM staged_records WHERE id = ?",
        RECORD_COLUMNS
    ))
    .bind(record_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(from_row).transpose()
}

/// Load a record that must belong to the given batch
pub async fn get_in_batch(
    pool: &SqlitePool,
    batch_id: Uuid,
    record_id: Uuid,
) -> Result<Option<StagedRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM staged_records WHERE id = ? AND batch_id = ?",
        RECORD_COLUMNS
    ))
    .bind(record_id.to_string())
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(from_row).transpose()
}

/// List batch records in upload order, optionally filtered by status
pub async fn list_by_batch(
    pool: &SqlitePool,
    batch_id: Uuid,
    status: Option<RecordStatus>,
) -> Result<Vec<StagedRecord>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {} FROM staged_records
                 WHERE batch_id = ? AND status = ? ORDER BY position",
                RECORD_COLUMNS
            ))
            .bind(batch_id.to_string())
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM staged_records WHERE batch_id = ? ORDER BY position",
                RECORD_COLUMNS
            ))
            .bind(batch_id.to_string())
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(from_row).collect()
}

/// Apply a review decision to a record that is still "pending".
/// Returns false if the record has already left "pending".
pub async fn set_reviewed(
    pool: &SqlitePool,
    batch_id: Uuid,
    record_id: Uuid,
    new_status: RecordStatus,
    reviewed_by: &str,
    review_notes: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE staged_records
         SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?
         WHERE id = ? AND batch_id = ? AND status = 'pending'",
    )
    .bind(new_status.as_str())
    .bind(reviewed_by)
    .bind(Utc::now().to_rfc3339())
    .bind(review_notes)
    .bind(record_id.to_string())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag a pending record as duplicate with its best-scoring match.
/// Returns false if the record has already left "pending".
pub async fn mark_duplicate(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: Uuid,
    duplicate_of: &str,
    similarity_score: f64,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE staged_records
         SET status = 'duplicate', duplicate_of = ?, similarity_score = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(duplicate_of)
    .bind(similarity_score)
    .bind(record_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Settle a "duplicate" record after its last candidate resolved.
/// `clear_match` removes duplicate_of/similarity_score (keep_both case).
/// Returns false if the record was no longer "duplicate".
pub async fn settle_duplicate(
    pool: &SqlitePool,
    record_id: Uuid,
    new_status: RecordStatus,
    clear_match: bool,
    resolved_by: &str,
    review_notes: &str,
) -> Result<bool> {
    let sql = if clear_match {
        "UPDATE staged_records
         SET status = ?, duplicate_of = NULL, similarity_score = NULL,
             reviewed_by = ?, reviewed_at = ?, review_notes = ?
         WHERE id = ? AND status = 'duplicate'"
    } else {
        "UPDATE staged_records
         SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?
         WHERE id = ? AND status = 'duplicate'"
    };

    let result = sqlx::query(sql)
        .bind(new_status.as_str())
        .bind(resolved_by)
        .bind(Utc::now().to_rfc3339())
        .bind(review_notes)
        .bind(record_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// approved → imported, recording the assigned canonical id.
/// The guard makes re-invocation after a crash skip records already
/// imported; returns false in that case.
pub async fn mark_imported(
    pool: &SqlitePool,
    record_id: Uuid,
    canonical_id: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE staged_records
         SET status = 'imported', canonical_id = ?
         WHERE id = ? AND status = 'approved'",
    )
    .bind(canonical_id)
    .bind(record_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Reject every record the batch cancel can still touch (imported records
/// are terminal and stay untouched). Returns the number rejected.
pub async fn reject_unfinished(pool: &SqlitePool, batch_id: Uuid, note: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE staged_records
         SET status = 'rejected', review_notes = ?, reviewed_at = ?
         WHERE batch_id = ? AND status IN ('pending', 'duplicate', 'approved')",
    )
    .bind(note)
    .bind(Utc::now().to_rfc3339())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Count records still blocking import: (pending, duplicate)
pub async fn unresolved_counts(pool: &SqlitePool, batch_id: Uuid) -> Result<(i64, i64)> {
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM staged_records WHERE batch_id = ? AND status = 'pending'",
    )
    .bind(batch_id.to_string())
    .fetch_one(pool)
    .await?;

    let duplicate: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM staged_records WHERE batch_id = ? AND status = 'duplicate'",
    )
    .bind(batch_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok((pending, duplicate))
}

/// Per-status record counts for a batch (batch detail statistics)
pub async fn status_statistics(
    pool: &SqlitePool,
    batch_id: Uuid,
) -> Result<std::collections::BTreeMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM staged_records WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}
