//! Duplicate detection against the production corpus
//!
//! Pending records are compared against every non-superseded corpus record
//! by question-text trigram similarity. Scoring fans out across blocking
//! worker tasks over an immutably shared corpus; nothing is written until
//! every chunk has joined, then candidates and record flags land in one
//! transaction. Re-running detection on a batch is idempotent.

use std::sync::Arc;

use chrono::Utc;
use qbank_common::config::DetectionConfig;
use qbank_common::db::models::{DuplicateCandidate, RecordStatus, Resolution};
use qbank_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{self, CorpusStore};
use crate::services::similarity::TrigramSet;

/// Records scored per worker task
const CHUNK_SIZE: usize = 32;

/// Result summary of one detection run
#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub batch_id: Uuid,
    pub records_checked: usize,
    pub corpus_size: usize,
    pub candidates_found: u64,
    pub records_flagged: usize,
}

struct CorpusEntry {
    id: String,
    topic: String,
    trigrams: TrigramSet,
}

struct RecordMatches {
    record_id: Uuid,
    /// (production_id, score), highest score first
    matches: Vec<(String, f64)>,
}

/// Runs duplicate detection for one batch
#[derive(Clone)]
pub struct DuplicateDetector {
    db: SqlitePool,
    corpus: CorpusStore,
    threshold: f64,
    same_topic_only: bool,
}

impl DuplicateDetector {
    pub fn new(db: SqlitePool, config: &DetectionConfig) -> Self {
        let corpus = CorpusStore::new(db.clone());
        Self {
            db,
            corpus,
            threshold: config.threshold,
            same_topic_only: config.same_topic_only,
        }
    }

    pub async fn run(&self, batch_id: Uuid) -> Result<DetectionOutcome> {
        let batch = db::batches::get(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", batch_id)))?;
        if batch.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "Batch {} is {}; detection only runs on pending or reviewing batches",
                batch_id,
                batch.status.as_str()
            )));
        }

        let records =
            db::records::list_by_batch(&self.db, batch_id, Some(RecordStatus::Pending)).await?;

        // A corpus read failure aborts before any write; the batch stays
        // where it was rather than silently passing with zero candidates.
        let corpus_records = self.corpus.list_active().await?;
        let corpus_size = corpus_records.len();
        let corpus: Arc<Vec<CorpusEntry>> = Arc::new(
            corpus_records
                .into_iter()
                .map(|r| CorpusEntry {
                    trigrams: TrigramSet::new(&r.question_text),
                    id: r.id,
                    topic: r.topic,
                })
                .collect(),
        );

        let mut handles = Vec::new();
        for chunk in records.chunks(CHUNK_SIZE) {
            let inputs: Vec<(Uuid, String, String)> = chunk
                .iter()
                .map(|r| (r.id, r.topic.clone(), r.question_text.clone()))
                .collect();
            let corpus = Arc::clone(&corpus);
            let threshold = self.threshold;
            let same_topic_only = self.same_topic_only;
            handles.push(tokio::task::spawn_blocking(move || {
                score_chunk(&inputs, &corpus, threshold, same_topic_only)
            }));
        }

        let mut all_matches: Vec<RecordMatches> = Vec::new();
        for joined in futures::future::join_all(handles).await {
            let chunk_matches =
                joined.map_err(|e| Error::Internal(format!("Detection worker failed: {}", e)))?;
            all_matches.extend(chunk_matches);
        }

        let now = Utc::now();
        let mut candidates = Vec::new();
        for m in &all_matches {
            for (production_id, score) in &m.matches {
                debug!(
                    record_id = %m.record_id,
                    production_id = %production_id,
                    score,
                    "Duplicate candidate"
                );
                candidates.push(DuplicateCandidate {
                    id: Uuid::new_v4(),
                    staged_record_id: m.record_id,
                    production_id: production_id.clone(),
                    similarity_score: *score,
                    resolution: Resolution::Pending,
                    resolution_notes: None,
                    resolved_by: None,
                    resolved_at: None,
                    created_at: now,
                });
            }
        }

        let mut records_flagged = 0;
        let mut tx = self.db.begin().await?;
        let candidates_found = db::candidates::insert_all(&mut tx, &candidates).await?;
        for m in &all_matches {
            if let Some((best_id, best_score)) = m.matches.first() {
                if db::records::mark_duplicate(&mut tx, m.record_id, best_id, *best_score).await? {
                    records_flagged += 1;
                }
            }
        }
        tx.commit().await?;

        // pending → reviewing; a no-op when re-running while reviewing
        db::batches::mark_reviewing(&self.db, batch_id).await?;
        db::batches::recompute_counts(&self.db, batch_id).await?;

        info!(
            batch_id = %batch_id,
            records_checked = records.len(),
            corpus_size,
            candidates_found,
            records_flagged,
            "Duplicate detection complete"
        );

        Ok(DetectionOutcome {
            batch_id,
            records_checked: records.len(),
            corpus_size,
            candidates_found,
            records_flagged,
        })
    }
}

fn score_chunk(
    inputs: &[(Uuid, String, String)],
    corpus: &[CorpusEntry],
    threshold: f64,
    same_topic_only: bool,
) -> Vec<RecordMatches> {
    let mut out = Vec::new();
    for (record_id, topic, question_text) in inputs {
        let trigrams = TrigramSet::new(question_text);
        let mut matches: Vec<(String, f64)> = corpus
            .iter()
            .filter(|entry| !same_topic_only || entry.topic == *topic)
            .filter_map(|entry| {
                let score = trigrams.dice(&entry.trigrams);
                (score >= threshold).then(|| (entry.id.clone(), score))
            })
            .collect();
        matches.sort_by(|a, b| b.1.total_cmp(&a.1));
        if !matches.is_empty() {
            out.push(RecordMatches {
                record_id: *record_id,
                matches,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::staging::{NewBatch, NewStagedRecord, StagingService};
    use chrono::Utc;
    use qbank_common::db::init_memory;
    use qbank_common::db::models::{BatchStatus, ProductionRecord};

    fn detector(pool: &SqlitePool, threshold: f64, same_topic_only: bool) -> DuplicateDetector {
        DuplicateDetector::new(
            pool.clone(),
            &DetectionConfig {
                threshold,
                same_topic_only,
            },
        )
    }

    fn new_record(topic: &str, question: &str) -> NewStagedRecord {
        NewStagedRecord {
            topic: topic.to_string(),
            subtopic: "General".to_string(),
            difficulty: "Basic".to_string(),
            qtype: "Question".to_string(),
            question_text: question.to_string(),
            answer_text: "An answer.".to_string(),
            notes: None,
        }
    }

    async fn stage(pool: &SqlitePool, records: Vec<NewStagedRecord>) -> Uuid {
        StagingService::new(pool.clone())
            .create_batch(NewBatch {
                source_filename: "upload.md".to_string(),
                submitted_by: "alice".to_string(),
                notes: None,
                records,
            })
            .await
            .unwrap()
            .id
    }

    async fn seed_corpus(pool: &SqlitePool, id: &str, topic: &str, question: &str) {
        CorpusStore::new(pool.clone())
            .insert(&ProductionRecord {
                id: id.to_string(),
                topic: topic.to_string(),
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
    async fn test_similar_question_flagged_at_low_threshold_only() {
        let pool = init_memory().await.unwrap();
        seed_corpus(
            &pool,
            "ACC-FS-B-Q-001",
            "Accounting",
            "What are the 3 financial statements?",
        )
        .await;

        // threshold 0.6: the paraphrase is close enough to flag
        let batch_id = stage(
            &pool,
            vec![new_record(
                "Accounting",
                "Walk me through the 3 financial statements",
            )],
        )
        .await;
        let outcome = detector(&pool, 0.6, false).run(batch_id).await.unwrap();
        assert_eq!(outcome.candidates_found, 1);
        assert_eq!(outcome.records_flagged, 1);

        // threshold 0.95: it is not a near-verbatim copy
        let batch_id = stage(
            &pool,
            vec![new_record(
                "Accounting",
                "Walk me through the 3 financial statements",
            )],
        )
        .await;
        let outcome = detector(&pool, 0.95, false).run(batch_id).await.unwrap();
        assert_eq!(outcome.candidates_found, 0);
        assert_eq!(outcome.records_flagged, 0);
    }

    #[tokio::test]
    async fn test_flagged_record_carries_best_match() {
        let pool = init_memory().await.unwrap();
        seed_corpus(
            &pool,
            "ACC-FS-B-Q-001",
            "Accounting",
            "What are the 3 financial statements?",
        )
        .await;
        seed_corpus(
            &pool,
            "ACC-FS-B-Q-002",
            "Accounting",
            "Name the 3 financial statements",
        )
        .await;

        let batch_id = stage(
            &pool,
            vec![new_record("Accounting", "What are the 3 financial statements")],
        )
        .await;
        let outcome = detector(&pool, 0.5, false).run(batch_id).await.unwrap();
        assert_eq!(outcome.candidates_found, 2);

        let records = db::records::list_by_batch(&pool, batch_id, None).await.unwrap();
        assert_eq!(records[0].status, RecordStatus::Duplicate);
        // the verbatim match outranks the paraphrase
        assert_eq!(records[0].duplicate_of.as_deref(), Some("ACC-FS-B-Q-001"));
        let score = records[0].similarity_score.unwrap();
        assert!(score > 0.99, "expected ~1.0, got {}", score);
    }

    #[tokio::test]
    async fn test_rerun_never_doubles_candidates() {
        let pool = init_memory().await.unwrap();
        seed_corpus(
            &pool,
            "ACC-FS-B-Q-001",
            "Accounting",
            "What are the 3 financial statements?",
        )
        .await;
        let batch_id = stage(
            &pool,
            vec![new_record(
                "Accounting",
                "Walk me through the 3 financial statements",
            )],
        )
        .await;

        let d = detector(&pool, 0.6, false);
        let first = d.run(batch_id).await.unwrap();
        assert_eq!(first.candidates_found, 1);

        let second = d.run(batch_id).await.unwrap();
        assert_eq!(second.candidates_found, 0);
        // already flagged, so nothing was pending to check
        assert_eq!(second.records_checked, 0);

        let (total, _) = db::candidates::count_for_batch(&pool, batch_id).await.unwrap();
        assert_eq!(total, 1);

        let batch = db::batches::get(&pool, batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Reviewing);
        assert_eq!(batch.duplicate_count, 1);
        assert_eq!(batch.pending_count, 0);
    }

    #[tokio::test]
    async fn test_unmatched_records_move_straight_to_review() {
        let pool = init_memory().await.unwrap();
        seed_corpus(
            &pool,
            "DCF-TV-A-C-001",
            "Valuation",
            "How do you calculate terminal value?",
        )
        .await;

        let batch_id = stage(
            &pool,
            vec![
                new_record("Accounting", "What is goodwill impairment?"),
                new_record("Accounting", "Define working capital"),
                new_record("Accounting", "Why does depreciation appear on all statements?"),
            ],
        )
        .await;
        let outcome = detector(&pool, 0.65, false).run(batch_id).await.unwrap();

        assert_eq!(outcome.records_checked, 3);
        assert_eq!(outcome.candidates_found, 0);
        assert_eq!(outcome.records_flagged, 0);

        let batch = db::batches::get(&pool, batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Reviewing);
        assert_eq!(batch.pending_count, 3);
        assert_eq!(batch.duplicate_count, 0);
    }

    #[tokio::test]
    async fn test_same_topic_only_skips_cross_topic_matches() {
        let pool = init_memory().await.unwrap();
        seed_corpus(
            &pool,
            "ACC-FS-B-Q-001",
            "Accounting",
            "What are the 3 financial statements?",
        )
        .await;

        let batch_id = stage(
            &pool,
            vec![new_record("Valuation", "What are the 3 financial statements?")],
        )
        .await;
        let outcome = detector(&pool, 0.6, true).run(batch_id).await.unwrap();
        assert_eq!(outcome.candidates_found, 0);
    }

    #[tokio::test]
    async fn test_superseded_corpus_records_excluded() {
        let pool = init_memory().await.unwrap();
        seed_corpus(
            &pool,
            "ACC-FS-B-Q-001",
            "Accounting",
            "What are the 3 financial statements?",
        )
        .await;
        CorpusStore::new(pool.clone())
            .supersede("ACC-FS-B-Q-001", "ACC-FS-B-Q-002")
            .await
            .unwrap();

        let batch_id = stage(
            &pool,
            vec![new_record("Accounting", "What are the 3 financial statements?")],
        )
        .await;
        let outcome = detector(&pool, 0.6, false).run(batch_id).await.unwrap();
        assert_eq!(outcome.corpus_size, 0);
        assert_eq!(outcome.candidates_found, 0);
    }

    #[tokio::test]
    async fn test_detection_rejected_on_terminal_batch() {
        let pool = init_memory().await.unwrap();
        let batch_id = stage(&pool, vec![new_record("Accounting", "What is EBITDA?")]).await;
        StagingService::new(pool.clone())
            .cancel_batch(batch_id)
            .await
            .unwrap();

        let err = detector(&pool, 0.65, false).run(batch_id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
