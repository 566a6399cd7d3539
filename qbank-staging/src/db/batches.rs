//! Upload batch database operations
//!
//! Status transitions are compare-and-set: the UPDATE carries the expected
//! current status in its WHERE clause and callers check the returned flag,
//! so concurrent transitions fail loudly instead of double-applying.

use chrono::Utc;
use qbank_common::db::models::{BatchStatus, UploadBatch};
use qbank_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

const BATCH_COLUMNS: &str = "id, source_filename, submitted_by, submitted_at, status, \
     total_count, pending_count, approved_count, rejected_count, duplicate_count, \
     notes, review_started_at, import_completed_at";

pub(crate) fn from_row(row: &SqliteRow) -> Result<UploadBatch> {
    let id: String = row.get("id");
    let submitted_at: String = row.get("submitted_at");
    let status: String = row.get("status");
    Ok(UploadBatch {
        id: super::parse_uuid(&id, "id")?,
        source_filename: row.get("source_filename"),
        submitted_by: row.get("submitted_by"),
        submitted_at: super::parse_timestamp(&submitted_at, "submitted_at")?,
        status: BatchStatus::parse(&status)?,
        total_count: row.get("total_count"),
        pending_count: row.get("pending_count"),
        approved_count: row.get("approved_count"),
        rejected_count: row.get("rejected_count"),
        duplicate_count: row.get("duplicate_count"),
        notes: row.get("notes"),
        review_started_at: super::parse_opt_timestamp(
            row.get("review_started_at"),
            "review_started_at",
        )?,
        import_completed_at: super::parse_opt_timestamp(
            row.get("import_completed_at"),
            "import_completed_at",
        )?,
    })
}

/// Insert a new batch inside the staging transaction
pub async fn insert(tx: &mut Transaction<'_, Sqlite>, batch: &UploadBatch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO upload_batches (
            id, source_filename, submitted_by, submitted_at, status,
            total_count, pending_count, approved_count, rejected_count,
            duplicate_count, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(&batch.source_filename)
    .bind(&batch.submitted_by)
    .bind(batch.submitted_at.to_rfc3339())
    .bind(batch.status.as_str())
    .bind(batch.total_count)
    .bind(batch.pending_count)
    .bind(batch.approved_count)
    .bind(batch.rejected_count)
    .bind(batch.duplicate_count)
    .bind(&batch.notes)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Load a batch by id
pub async fn get(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<UploadBatch>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM upload_batches WHERE id = ?",
        BATCH_COLUMNS
    ))
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(from_row).transpose()
}

/// List batches, newest first, with optional status filter
pub async fn list(
    pool: &SqlitePool,
    status: Option<BatchStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<UploadBatch>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {} FROM upload_batches WHERE status = ?
                 ORDER BY submitted_at DESC LIMIT ? OFFSET ?",
                BATCH_COLUMNS
            ))
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM upload_batches
                 ORDER BY submitted_at DESC LIMIT ? OFFSET ?",
                BATCH_COLUMNS
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(from_row).collect()
}

/// Batch counts by status across the whole store
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStatusCounts {
    pub total: i64,
    pub pending: i64,
    pub reviewing: i64,
    pub completed: i64,
    pub cancelled: i64,
}

pub async fn status_counts(pool: &SqlitePool) -> Result<BatchStatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM upload_batches GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut counts = BatchStatusCounts::default();
    for (status, count) in rows {
        counts.total += count;
        match BatchStatus::parse(&status)? {
            BatchStatus::Pending => counts.pending = count,
            BatchStatus::Reviewing => counts.reviewing = count,
            BatchStatus::Completed => counts.completed = count,
            BatchStatus::Cancelled => counts.cancelled = count,
        }
    }
    Ok(counts)
}

/// pending → reviewing, once detection has completed.
/// Returns false if the batch was not in "pending".
pub async fn mark_reviewing(pool: &SqlitePool, batch_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE upload_batches
         SET status = 'reviewing', review_started_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// reviewing → completed, after a fully-successful import.
/// Returns false if the batch was not in "reviewing".
pub async fn mark_completed(pool: &SqlitePool, batch_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE upload_batches
         SET status = 'completed', import_completed_at = ?
         WHERE id = ? AND status = 'reviewing'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// any non-terminal state → cancelled.
/// Returns false if the batch was already completed or cancelled.
pub async fn mark_cancelled(pool: &SqlitePool, batch_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE upload_batches
         SET status = 'cancelled'
         WHERE id = ? AND status NOT IN ('completed', 'cancelled')",
    )
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Recompute aggregate counts from authoritative per-record statuses.
///
/// Never maintained as incremented counters; this runs after every record
/// mutation. Imported records count toward approved_count so the counts
/// keep summing to total_count after import.
pub async fn recompute_counts(pool: &SqlitePool, batch_id: Uuid) -> Result<()> {
    let id = batch_id.to_string();
    sqlx::query(
        r#"
        UPDATE upload_batches SET
            pending_count = (SELECT COUNT(*) FROM staged_records
                             WHERE batch_id = ? AND status = 'pending'),
            approved_count = (SELECT COUNT(*) FROM staged_records
                              WHERE batch_id = ? AND status IN ('approved', 'imported')),
            rejected_count = (SELECT COUNT(*) FROM staged_records
                              WHERE batch_id = ? AND status = 'rejected'),
            duplicate_count = (SELECT COUNT(*) FROM staged_records
                               WHERE batch_id = ? AND status = 'duplicate')
        WHERE id = ?
        "#,
    )
    .bind(&id)
    .bind(&id)
    .bind(&id)
    .bind(&id)
    .bind(&id)
    .execute(pool)
    .await?;

    Ok(())
}
