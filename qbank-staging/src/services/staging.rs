//! Batch staging and lifecycle
//!
//! Creation stages the batch and every record in one transaction; a failed
//! submission leaves nothing behind. Cancellation is a discrete operation
//! that rejects whatever records it can still reach.

use chrono::Utc;
use qbank_common::db::models::{
    BatchStatus, RecordStatus, StagedRecord, UploadBatch, DIFFICULTIES, QUESTION_TYPES,
};
use qbank_common::{Error, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;

/// Incoming batch submission
#[derive(Debug, Clone, Deserialize)]
pub struct NewBatch {
    pub source_filename: String,
    pub submitted_by: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub records: Vec<NewStagedRecord>,
}

/// One candidate question within a submission
#[derive(Debug, Clone, Deserialize)]
pub struct NewStagedRecord {
    pub topic: String,
    pub subtopic: String,
    pub difficulty: String,
    pub qtype: String,
    pub question_text: String,
    pub answer_text: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Staging and batch lifecycle operations
#[derive(Clone)]
pub struct StagingService {
    db: SqlitePool,
}

impl StagingService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a batch and stage all its records atomically
    pub async fn create_batch(&self, submission: NewBatch) -> Result<UploadBatch> {
        validate_submission(&submission)?;

        let now = Utc::now();
        let batch = UploadBatch {
            id: Uuid::new_v4(),
            source_filename: submission.source_filename,
            submitted_by: submission.submitted_by,
            submitted_at: now,
            status: BatchStatus::Pending,
            total_count: submission.records.len() as i64,
            pending_count: submission.records.len() as i64,
            approved_count: 0,
            rejected_count: 0,
            duplicate_count: 0,
            notes: submission.notes,
            review_started_at: None,
            import_completed_at: None,
        };

        let mut tx = self.db.begin().await?;
        db::batches::insert(&mut tx, &batch).await?;
        for (position, record) in submission.records.into_iter().enumerate() {
            let staged = StagedRecord {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                position: position as i64,
                topic: record.topic,
                subtopic: record.subtopic,
                difficulty: record.difficulty,
                qtype: record.qtype,
                question_text: record.question_text,
                answer_text: record.answer_text,
                notes: record.notes,
                status: RecordStatus::Pending,
                duplicate_of: None,
                similarity_score: None,
                review_notes: None,
                reviewed_by: None,
                reviewed_at: None,
                canonical_id: None,
                created_at: now,
            };
            db::records::insert(&mut tx, &staged).await?;
        }
        tx.commit().await?;

        info!(
            batch_id = %batch.id,
            records = batch.total_count,
            submitted_by = %batch.submitted_by,
            "Batch staged"
        );
        Ok(batch)
    }

    /// Load a batch, mapping absence to NotFound
    pub async fn get_batch(&self, batch_id: Uuid) -> Result<UploadBatch> {
        db::batches::get(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", batch_id)))
    }

    /// Cancel a batch: reject its unfinished records, mark it cancelled.
    /// Already-imported records are terminal and stay imported.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<UploadBatch> {
        let batch = self.get_batch(batch_id).await?;
        if batch.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "Batch {} is already {}",
                batch_id,
                batch.status.as_str()
            )));
        }

        let rejected =
            db::records::reject_unfinished(&self.db, batch_id, "Batch cancelled").await?;
        if !db::batches::mark_cancelled(&self.db, batch_id).await? {
            // lost a race with another cancel or a completing import
            let current = self.get_batch(batch_id).await?;
            return Err(Error::Conflict(format!(
                "Batch {} is already {}",
                batch_id,
                current.status.as_str()
            )));
        }
        db::batches::recompute_counts(&self.db, batch_id).await?;

        info!(batch_id = %batch_id, rejected, "Batch cancelled");
        self.get_batch(batch_id).await
    }
}

fn validate_submission(submission: &NewBatch) -> Result<()> {
    if submission.source_filename.trim().is_empty() {
        return Err(Error::Validation("source_filename must not be empty".into()));
    }
    if submission.submitted_by.trim().is_empty() {
        return Err(Error::Validation("submitted_by must not be empty".into()));
    }
    if submission.records.is_empty() {
        return Err(Error::Validation(
            "A batch must contain at least one record".into(),
        ));
    }
    for (i, record) in submission.records.iter().enumerate() {
        if record.topic.trim().is_empty() {
            return Err(Error::Validation(format!("Record {}: topic is empty", i)));
        }
        if record.subtopic.trim().is_empty() {
            return Err(Error::Validation(format!("Record {}: subtopic is empty", i)));
        }
        if record.question_text.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Record {}: question_text is empty",
                i
            )));
        }
        if record.answer_text.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Record {}: answer_text is empty",
                i
            )));
        }
        if !DIFFICULTIES.contains(&record.difficulty.as_str()) {
            return Err(Error::Validation(format!(
                "Record {}: unknown difficulty '{}' (expected one of {:?})",
                i, record.difficulty, DIFFICULTIES
            )));
        }
        if !QUESTION_TYPES.contains(&record.qtype.as_str()) {
            return Err(Error::Validation(format!(
                "Record {}: unknown question type '{}' (expected one of {:?})",
                i, record.qtype, QUESTION_TYPES
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbank_common::db::init_memory;

    fn record(question: &str) -> NewStagedRecord {
        NewStagedRecord {
            topic: "Accounting".to_string(),
            subtopic: "Depreciation".to_string(),
            difficulty: "Basic".to_string(),
            qtype: "Definition".to_string(),
            question_text: question.to_string(),
            answer_text: "An answer.".to_string(),
            notes: None,
        }
    }

    fn submission(records: Vec<NewStagedRecord>) -> NewBatch {
        NewBatch {
            source_filename: "upload.md".to_string(),
            submitted_by: "alice".to_string(),
            notes: None,
            records,
        }
    }

    #[tokio::test]
    async fn test_create_batch_stages_records_in_order() {
        let pool = init_memory().await.unwrap();
        let service = StagingService::new(pool.clone());

        let batch = service
            .create_batch(submission(vec![
                record("What is depreciation?"),
                record("Why does depreciation matter?"),
            ]))
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.total_count, 2);
        assert_eq!(batch.pending_count, 2);

        let records = db::records::list_by_batch(&pool, batch.id, None)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].position, 0);
        assert_eq!(records[1].position, 1);
        assert_eq!(records[0].question_text, "What is depreciation?");
        assert!(records
            .iter()
            .all(|r| r.status == RecordStatus::Pending));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let pool = init_memory().await.unwrap();
        let service = StagingService::new(pool);

        let err = service.create_batch(submission(vec![])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_invalid_difficulty_rejected_atomically() {
        let pool = init_memory().await.unwrap();
        let service = StagingService::new(pool.clone());

        let mut bad = record("What is goodwill?");
        bad.difficulty = "Expert".to_string();
        let err = service
            .create_batch(submission(vec![record("ok"), bad]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staged_records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_cancel_rejects_unfinished_records() {
        let pool = init_memory().await.unwrap();
        let service = StagingService::new(pool.clone());

        let batch = service
            .create_batch(submission(vec![record("q1"), record("q2")]))
            .await
            .unwrap();
        let cancelled = service.cancel_batch(batch.id).await.unwrap();

        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.rejected_count, 2);
        assert_eq!(cancelled.pending_count, 0);

        let err = service.cancel_batch(batch.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
