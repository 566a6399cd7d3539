//! Promotion of approved records into the production corpus
//!
//! Import is the only writer into production_records. Callers serialize
//! imports through a process-level lock; the approved→imported status
//! guard is the safety net underneath it. Per-record failures never roll
//! back earlier imports: the batch stays reviewing and a retry picks up
//! exactly the records still approved.

use std::collections::HashMap;

use chrono::Utc;
use qbank_common::db::models::{BatchStatus, ProductionRecord, RecordStatus, StagedRecord};
use qbank_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, CorpusStore};
use crate::services::identifier;

/// Result summary of one import call
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub batch_id: Uuid,
    pub batch_status: BatchStatus,
    pub imported_count: usize,
    pub failed_count: usize,
    /// Canonical ids assigned this call, in batch order
    pub imported_ids: Vec<String>,
    pub failed_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

/// Imports a reviewed batch into the production corpus
#[derive(Clone)]
pub struct Importer {
    db: SqlitePool,
    corpus: CorpusStore,
}

impl Importer {
    pub fn new(db: SqlitePool) -> Self {
        let corpus = CorpusStore::new(db.clone());
        Self { db, corpus }
    }

    pub async fn import_batch(&self, batch_id: Uuid, imported_by: &str) -> Result<ImportOutcome> {
        if imported_by.trim().is_empty() {
            return Err(Error::Validation("imported_by must not be empty".into()));
        }

        let batch = db::batches::get(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", batch_id)))?;
        if batch.status != BatchStatus::Reviewing {
            return Err(Error::Conflict(format!(
                "Batch {} is {}; only reviewing batches can be imported",
                batch_id,
                batch.status.as_str()
            )));
        }

        let (pending, duplicate) = db::records::unresolved_counts(&self.db, batch_id).await?;
        if pending > 0 || duplicate > 0 {
            return Err(Error::Conflict(format!(
                "Batch {} has {} pending and {} unresolved duplicate records",
                batch_id, pending, duplicate
            )));
        }

        let approved =
            db::records::list_by_batch(&self.db, batch_id, Some(RecordStatus::Approved)).await?;

        let mut sequences: HashMap<String, u32> = HashMap::new();
        let mut imported_ids = Vec::new();
        let mut failed_ids = Vec::new();
        let mut errors = Vec::new();

        for record in &approved {
            match self
                .import_one(record, imported_by, &mut sequences)
                .await
            {
                Ok(canonical_id) => imported_ids.push(canonical_id),
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Record import failed");
                    failed_ids.push(record.id);
                    errors.push(format!("{}: {}", record.id, e));
                }
            }
        }

        db::batches::recompute_counts(&self.db, batch_id).await?;

        let batch_status = if failed_ids.is_empty() {
            self.finish_batch(batch_id).await?
        } else {
            BatchStatus::Reviewing
        };

        info!(
            batch_id = %batch_id,
            imported_count = imported_ids.len(),
            failed_count = failed_ids.len(),
            imported_by,
            batch_status = batch_status.as_str(),
            "Import finished"
        );
        Ok(ImportOutcome {
            batch_id,
            batch_status,
            imported_count: imported_ids.len(),
            failed_count: failed_ids.len(),
            imported_ids,
            failed_ids,
            errors,
        })
    }

    /// reviewing → completed after a fully-successful import. When the
    /// guard loses to a concurrent cancel the outcome reports the actual
    /// batch state rather than claiming completion.
    async fn finish_batch(&self, batch_id: Uuid) -> Result<BatchStatus> {
        if db::batches::mark_completed(&self.db, batch_id).await? {
            return Ok(BatchStatus::Completed);
        }
        let batch = db::batches::get(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", batch_id)))?;
        warn!(
            batch_id = %batch_id,
            status = batch.status.as_str(),
            "Batch left the reviewing state during import"
        );
        Ok(batch.status)
    }

    async fn import_one(
        &self,
        record: &StagedRecord,
        imported_by: &str,
        sequences: &mut HashMap<String, u32>,
    ) -> Result<String> {
        // A previous run may have inserted the production row and crashed
        // before marking the staged record; reuse that row instead of
        // assigning a second id.
        let canonical_id = match self.corpus.find_by_origin(record.id).await? {
            Some(existing) => existing.id,
            None => {
                let canonical_id = self.next_canonical_id(record, sequences).await?;
                self.corpus
                    .insert(&ProductionRecord {
                        id: canonical_id.clone(),
                        topic: record.topic.clone(),
                        subtopic: record.subtopic.clone(),
                        difficulty: record.difficulty.clone(),
                        qtype: record.qtype.clone(),
                        question_text: record.question_text.clone(),
                        answer_text: record.answer_text.clone(),
                        notes: record.notes.clone(),
                        superseded_by: None,
                        imported_at: Utc::now(),
                        imported_from: Some(record.id),
                    })
                    .await?;
                canonical_id
            }
        };

        if !db::records::mark_imported(&self.db, record.id, &canonical_id).await? {
            // lost the approved→imported guard; the record moved under us
            return Err(Error::Conflict(format!(
                "Record {} left the approved state during import",
                record.id
            )));
        }

        // soft-supersede the production records this one replaces; the row
        // is already imported, so failures are reported, not rolled back
        for old_id in db::candidates::replace_targets(&self.db, record.id).await? {
            if !self.corpus.supersede(&old_id, &canonical_id).await? {
                warn!(
                    old_id = %old_id,
                    new_id = %canonical_id,
                    "Replace target was missing or already superseded"
                );
            }
        }

        info!(
            record_id = %record.id,
            canonical_id = %canonical_id,
            imported_by,
            "Record imported"
        );
        Ok(canonical_id)
    }

    /// Next canonical id for a record: corpus scan seeds each base group's
    /// sequence once, then in-batch allocations advance it locally
    async fn next_canonical_id(
        &self,
        record: &StagedRecord,
        sequences: &mut HashMap<String, u32>,
    ) -> Result<String> {
        let base = identifier::canonical_base(
            &record.topic,
            &record.subtopic,
            &record.difficulty,
            &record.qtype,
        );
        if !sequences.contains_key(&base) {
            let max = self.corpus.max_sequence(&base).await?;
            sequences.insert(base.clone(), max);
        }
        let seq = sequences
            .get_mut(&base)
            .map(|s| {
                *s += 1;
                *s
            })
            .unwrap_or(1);
        Ok(identifier::canonical_id(&base, seq))
    }
}
