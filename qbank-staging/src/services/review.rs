//! Human review: bulk approve/reject and duplicate resolution
//!
//! Every transition is a compare-and-set UPDATE; losing the race yields a
//! conflict carrying the current state, never a silent overwrite. Bulk
//! review is all-or-nothing per record and reports each outcome.

use qbank_common::db::models::{
    BatchStatus, DuplicateCandidate, RecordStatus, Resolution, StagedRecord,
};
use qbank_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;

/// Bulk review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    fn target_status(self) -> RecordStatus {
        match self {
            ReviewAction::Approve => RecordStatus::Approved,
            ReviewAction::Reject => RecordStatus::Rejected,
        }
    }
}

/// Per-record result of a bulk review call
#[derive(Debug, Clone, Serialize)]
pub struct RecordReviewResult {
    pub record_id: Uuid,
    pub updated: bool,
    pub status: Option<RecordStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Summary of a bulk review call
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub updated_count: usize,
    pub results: Vec<RecordReviewResult>,
}

/// Result of resolving one duplicate candidate
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub candidate: DuplicateCandidate,
    pub record: StagedRecord,
}

/// Review and duplicate-resolution operations
#[derive(Clone)]
pub struct ReviewCoordinator {
    db: SqlitePool,
}

impl ReviewCoordinator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Approve or reject a set of pending records.
    ///
    /// Partial success: each record succeeds or fails on its own, and the
    /// outcome lists every result. Records flagged as duplicates are not
    /// reviewable here; their candidates must be resolved first.
    pub async fn review_records(
        &self,
        batch_id: Uuid,
        record_ids: &[Uuid],
        action: ReviewAction,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<ReviewOutcome> {
        if record_ids.is_empty() {
            return Err(Error::Validation("record_ids must not be empty".into()));
        }
        if reviewed_by.trim().is_empty() {
            return Err(Error::Validation("reviewed_by must not be empty".into()));
        }

        let batch = db::batches::get(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", batch_id)))?;
        if batch.status != BatchStatus::Reviewing {
            return Err(Error::Conflict(format!(
                "Batch {} is {}; review requires a reviewing batch",
                batch_id,
                batch.status.as_str()
            )));
        }

        let target = action.target_status();
        let mut results = Vec::with_capacity(record_ids.len());
        let mut updated_count = 0;

        for &record_id in record_ids {
            let result = self
                .review_one(batch_id, record_id, target, reviewed_by, notes)
                .await?;
            if result.updated {
                updated_count += 1;
            }
            results.push(result);
        }

        db::batches::recompute_counts(&self.db, batch_id).await?;

        info!(
            batch_id = %batch_id,
            action = ?action,
            requested = record_ids.len(),
            updated_count,
            reviewed_by,
            "Bulk review applied"
        );
        Ok(ReviewOutcome {
            updated_count,
            results,
        })
    }

    async fn review_one(
        &self,
        batch_id: Uuid,
        record_id: Uuid,
        target: RecordStatus,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<RecordReviewResult> {
        let Some(record) = db::records::get_in_batch(&self.db, batch_id, record_id).await? else {
            return Ok(RecordReviewResult {
                record_id,
                updated: false,
                status: None,
                message: Some("Record not found in batch".to_string()),
            });
        };

        if record.status == RecordStatus::Duplicate {
            return Ok(RecordReviewResult {
                record_id,
                updated: false,
                status: Some(record.status),
                message: Some(
                    "Record is flagged as duplicate; resolve its candidates instead".to_string(),
                ),
            });
        }

        if db::records::set_reviewed(&self.db, batch_id, record_id, target, reviewed_by, notes)
            .await?
        {
            return Ok(RecordReviewResult {
                record_id,
                updated: true,
                status: Some(target),
                message: None,
            });
        }

        // guard lost: report whatever state the record is in now
        let current = db::records::get_in_batch(&self.db, batch_id, record_id).await?;
        let status = current.map(|r| r.status);
        Ok(RecordReviewResult {
            record_id,
            updated: false,
            status,
            message: Some(format!(
                "Record is {}, not pending",
                status.map(|s| s.as_str()).unwrap_or("missing")
            )),
        })
    }

    /// Resolve one duplicate candidate, then reconcile its staged record
    /// once no pending candidates remain:
    /// any keep_existing → rejected, otherwise approved. When every
    /// resolution was keep_both the duplicate flag was a false positive
    /// and the match fields are cleared.
    pub async fn resolve_duplicate(
        &self,
        candidate_id: Uuid,
        resolution: Resolution,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ResolveOutcome> {
        if resolution == Resolution::Pending {
            return Err(Error::Validation(
                "Resolution must be keep_existing, replace or keep_both".into(),
            ));
        }
        if resolved_by.trim().is_empty() {
            return Err(Error::Validation("resolved_by must not be empty".into()));
        }

        let candidate = db::candidates::get(&self.db, candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Candidate {} not found", candidate_id)))?;

        let record = db::records::get(&self.db, candidate.staged_record_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Record {} not found", candidate.staged_record_id))
            })?;
        let batch = db::batches::get(&self.db, record.batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", record.batch_id)))?;
        if batch.status != BatchStatus::Reviewing {
            return Err(Error::Conflict(format!(
                "Batch {} is {}; duplicate resolution requires a reviewing batch",
                batch.id,
                batch.status.as_str()
            )));
        }

        if !db::candidates::resolve(&self.db, candidate_id, resolution, resolved_by, notes).await? {
            let current = db::candidates::get(&self.db, candidate_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Candidate {} not found", candidate_id)))?;
            return Err(Error::Conflict(format!(
                "Candidate {} is already resolved as {}",
                candidate_id,
                current.resolution.as_str()
            )));
        }

        self.reconcile_record(candidate.staged_record_id, resolved_by)
            .await?;

        let candidate = db::candidates::get(&self.db, candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Candidate {} not found", candidate_id)))?;
        let record = db::records::get(&self.db, candidate.staged_record_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Record {} not found", candidate.staged_record_id))
            })?;

        db::batches::recompute_counts(&self.db, record.batch_id).await?;

        info!(
            candidate_id = %candidate_id,
            record_id = %record.id,
            resolution = resolution.as_str(),
            record_status = record.status.as_str(),
            resolved_by,
            "Duplicate candidate resolved"
        );
        Ok(ResolveOutcome { candidate, record })
    }

    /// Flip a duplicate record to approved/rejected once its last pending
    /// candidate has been resolved
    async fn reconcile_record(&self, record_id: Uuid, resolved_by: &str) -> Result<()> {
        let candidates = db::candidates::list_by_record(&self.db, record_id).await?;
        if candidates
            .iter()
            .any(|c| c.resolution == Resolution::Pending)
        {
            return Ok(());
        }

        let any_keep_existing = candidates
            .iter()
            .any(|c| c.resolution == Resolution::KeepExisting);
        let all_keep_both = candidates
            .iter()
            .all(|c| c.resolution == Resolution::KeepBoth);

        let (status, note) = if any_keep_existing {
            (RecordStatus::Rejected, "Duplicate of existing question")
        } else {
            (RecordStatus::Approved, "Duplicate candidates resolved")
        };

        db::records::settle_duplicate(
            &self.db,
            record_id,
            status,
            all_keep_both,
            resolved_by,
            note,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CorpusStore;
    use crate::services::detection::DuplicateDetector;
    use crate::services::staging::{NewBatch, NewStagedRecord, StagingService};
    use chrono::Utc;
    use qbank_common::config::DetectionConfig;
    use qbank_common::db::init_memory;
    use qbank_common::db::models::ProductionRecord;

    async fn staged_batch(pool: &SqlitePool, questions: &[&str]) -> Uuid {
        let records = questions
            .iter()
            .map(|q| NewStagedRecord {
                topic: "Accounting".to_string(),
                subtopic: "General".to_string(),
                difficulty: "Basic".to_string(),
                qtype: "Question".to_string(),
                question_text: q.to_string(),
                answer_text: "An answer.".to_string(),
                notes: None,
            })
            .collect();
        let batch_id = StagingService::new(pool.clone())
            .create_batch(NewBatch {
                source_filename: "upload.md".to_string(),
                submitted_by: "alice".to_string(),
                notes: None,
                records,
            })
            .await
            .unwrap()
            .id;
        // move the batch into review
        DuplicateDetector::new(pool.clone(), &DetectionConfig::default())
            .run(batch_id)
            .await
            .unwrap();
        batch_id
    }

    async fn seed_corpus(pool: &SqlitePool, id: &str, question: &str) {
        CorpusStore::new(pool.clone())
            .insert(&ProductionRecord {
                id: id.to_string(),
                topic: "Accounting".to_string(),
                subtopic: "General".to_string(),
                difficulty: "Basic".to_string(),
                qtype: "Question".to_string(),
                question_text: question.to_string(),
                answer_text: "An answer.".to_string(),
                notes: None,
                superseded_by: None,
                imported_at: Utc::now(),
                imported_from: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bulk_approve_and_reject() {
        let pool = init_memory().await.unwrap();
        let batch_id = staged_batch(&pool, &["q one", "q two", "q three"]).await;
        let records = db::records::list_by_batch(&pool, batch_id, None).await.unwrap();
        let coordinator = ReviewCoordinator::new(pool.clone());

        let outcome = coordinator
            .review_records(
                batch_id,
                &[records[0].id, records[1].id],
                ReviewAction::Approve,
                "bob",
                Some("looks good"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.updated_count, 2);

        let outcome = coordinator
            .review_records(batch_id, &[records[2].id], ReviewAction::Reject, "bob", None)
            .await
            .unwrap();
        assert_eq!(outcome.updated_count, 1);

        let batch = db::batches::get(&pool, batch_id).await.unwrap().unwrap();
        assert_eq!(batch.approved_count, 2);
        assert_eq!(batch.rejected_count, 1);
        assert_eq!(batch.pending_count, 0);
        assert_eq!(
            batch.total_count,
            batch.pending_count + batch.approved_count + batch.rejected_count
                + batch.duplicate_count
        );
    }

    #[tokio::test]
    async fn test_double_review_reports_conflict_per_record() {
        let pool = init_memory().await.unwrap();
        let batch_id = staged_batch(&pool, &["q one"]).await;
        let records = db::records::list_by_batch(&pool, batch_id, None).await.unwrap();
        let coordinator = ReviewCoordinator::new(pool.clone());

        coordinator
            .review_records(batch_id, &[records[0].id], ReviewAction::Approve, "bob", None)
            .await
            .unwrap();
        let outcome = coordinator
            .review_records(batch_id, &[records[0].id], ReviewAction::Reject, "carol", None)
            .await
            .unwrap();

        assert_eq!(outcome.updated_count, 0);
        assert!(!outcome.results[0].updated);
        assert_eq!(outcome.results[0].status, Some(RecordStatus::Approved));
        // the losing reviewer never overwrote the first decision
        let record = db::records::get(&pool, records[0].id).await.unwrap().unwrap();
        assert_eq!(record.reviewed_by.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_duplicate_record_not_bulk_reviewable() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let records = db::records::list_by_batch(&pool, batch_id, None).await.unwrap();
        assert_eq!(records[0].status, RecordStatus::Duplicate);

        let outcome = ReviewCoordinator::new(pool.clone())
            .review_records(batch_id, &[records[0].id], ReviewAction::Approve, "bob", None)
            .await
            .unwrap();
        assert_eq!(outcome.updated_count, 0);
        assert_eq!(outcome.results[0].status, Some(RecordStatus::Duplicate));
    }

    #[tokio::test]
    async fn test_keep_existing_rejects_record() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let candidates = db::candidates::list_by_batch(&pool, batch_id).await.unwrap();
        assert_eq!(candidates.len(), 1);

        let outcome = ReviewCoordinator::new(pool.clone())
            .resolve_duplicate(candidates[0].id, Resolution::KeepExisting, "bob", None)
            .await
            .unwrap();

        assert_eq!(outcome.candidate.resolution, Resolution::KeepExisting);
        assert_eq!(outcome.record.status, RecordStatus::Rejected);

        let batch = db::batches::get(&pool, batch_id).await.unwrap().unwrap();
        assert_eq!(batch.rejected_count, 1);
        assert_eq!(batch.duplicate_count, 0);
    }

    #[tokio::test]
    async fn test_keep_both_approves_and_clears_match() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let candidates = db::candidates::list_by_batch(&pool, batch_id).await.unwrap();

        let outcome = ReviewCoordinator::new(pool.clone())
            .resolve_duplicate(candidates[0].id, Resolution::KeepBoth, "bob", None)
            .await
            .unwrap();

        assert_eq!(outcome.record.status, RecordStatus::Approved);
        assert!(outcome.record.duplicate_of.is_none());
        assert!(outcome.record.similarity_score.is_none());
    }

    #[tokio::test]
    async fn test_replace_approves_and_keeps_match() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let candidates = db::candidates::list_by_batch(&pool, batch_id).await.unwrap();

        let outcome = ReviewCoordinator::new(pool.clone())
            .resolve_duplicate(candidates[0].id, Resolution::Replace, "bob", None)
            .await
            .unwrap();

        assert_eq!(outcome.record.status, RecordStatus::Approved);
        assert_eq!(
            outcome.record.duplicate_of.as_deref(),
            Some("ACC-GEN-B-Q-001")
        );
    }

    #[tokio::test]
    async fn test_record_waits_for_last_candidate() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        seed_corpus(&pool, "ACC-GEN-B-Q-002", "Define working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let candidates = db::candidates::list_by_batch(&pool, batch_id).await.unwrap();
        assert_eq!(candidates.len(), 2);

        let coordinator = ReviewCoordinator::new(pool.clone());
        let outcome = coordinator
            .resolve_duplicate(candidates[0].id, Resolution::KeepBoth, "bob", None)
            .await
            .unwrap();
        // one candidate still pending, record stays flagged
        assert_eq!(outcome.record.status, RecordStatus::Duplicate);

        let outcome = coordinator
            .resolve_duplicate(candidates[1].id, Resolution::KeepExisting, "bob", None)
            .await
            .unwrap();
        // keep_existing wins over keep_both
        assert_eq!(outcome.record.status, RecordStatus::Rejected);
    }

    #[tokio::test]
    async fn test_double_resolution_conflicts_with_current_state() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let candidates = db::candidates::list_by_batch(&pool, batch_id).await.unwrap();

        let coordinator = ReviewCoordinator::new(pool.clone());
        coordinator
            .resolve_duplicate(candidates[0].id, Resolution::KeepBoth, "bob", None)
            .await
            .unwrap();
        let err = coordinator
            .resolve_duplicate(candidates[0].id, Resolution::Replace, "carol", None)
            .await
            .unwrap_err();

        match err {
            Error::Conflict(msg) => assert!(msg.contains("keep_both"), "{}", msg),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolution_rejected_on_cancelled_batch() {
        let pool = init_memory().await.unwrap();
        seed_corpus(&pool, "ACC-GEN-B-Q-001", "What is working capital?").await;
        let batch_id = staged_batch(&pool, &["What is working capital?"]).await;
        let candidates = db::candidates::list_by_batch(&pool, batch_id).await.unwrap();
        assert_eq!(candidates.len(), 1);

        StagingService::new(pool.clone())
            .cancel_batch(batch_id)
            .await
            .unwrap();

        let err = ReviewCoordinator::new(pool.clone())
            .resolve_duplicate(candidates[0].id, Resolution::Replace, "bob", None)
            .await
            .unwrap_err();
        match err {
            Error::Conflict(msg) => assert!(msg.contains("cancelled"), "{}", msg),
            other => panic!("expected conflict, got {:?}", other),
        }

        // nothing was recorded against the cancelled batch
        let candidate = db::candidates::get(&pool, candidates[0].id).await.unwrap().unwrap();
        assert_eq!(candidate.resolution, Resolution::Pending);
        let record = db::records::get(&pool, candidate.staged_record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecordStatus::Rejected);
    }

    #[tokio::test]
    async fn test_pending_is_not_a_valid_resolution() {
        let pool = init_memory().await.unwrap();
        let err = ReviewCoordinator::new(pool)
            .resolve_duplicate(Uuid::new_v4(), Resolution::Pending, "bob", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
