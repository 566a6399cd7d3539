//! Production corpus access
//!
//! The corpus is the system of record the staging pipeline reads for
//! detection and writes at import. It lives in the shared database here,
//! but every failure surfaces as a dependency error so callers (and API
//! clients) can tell "corpus unavailable" apart from a staging-side bug.

use chrono::{DateTime, Utc};
use qbank_common::db::models::ProductionRecord;
use qbank_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const PRODUCTION_COLUMNS: &str = "id, topic, subtopic, difficulty, qtype, question_text, \
     answer_text, notes, superseded_by, imported_at, imported_from";

/// Read/write handle over the production corpus
#[derive(Clone)]
pub struct CorpusStore {
    db: SqlitePool,
}

impl CorpusStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    fn from_row(row: &SqliteRow) -> Result<ProductionRecord> {
        let imported_at: String = row.get("imported_at");
        let imported_from: Option<String> = row.get("imported_from");
        Ok(ProductionRecord {
            id: row.get("id"),
            topic: row.get("topic"),
            subtopic: row.get("subtopic"),
            difficulty: row.get("difficulty"),
            qtype: row.get("qtype"),
            question_text: row.get("question_text"),
            answer_text: row.get("answer_text"),
            notes: row.get("notes"),
            superseded_by: row.get("superseded_by"),
            imported_at: parse_timestamp(&imported_at)?,
            imported_from: imported_from
                .map(|v| {
                    Uuid::parse_str(&v).map_err(|e| {
                        Error::Dependency(format!("Corrupt imported_from in corpus: {}", e))
                    })
                })
                .transpose()?,
        })
    }

    /// Load a production record by canonical id
    pub async fn get(&self, id: &str) -> Result<Option<ProductionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM production_records WHERE id = ?",
            PRODUCTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(dep_err)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    /// Active (non-superseded) corpus, the comparison set for detection
    pub async fn list_active(&self) -> Result<Vec<ProductionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM production_records WHERE superseded_by IS NULL",
            PRODUCTION_COLUMNS
        ))
        .fetch_all(&self.db)
        .await
        .map_err(dep_err)?;

        rows.iter().map(Self::from_row).collect()
    }

    /// Insert a newly-imported record
    pub async fn insert(&self, record: &ProductionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO production_records (
                id, topic, subtopic, difficulty, qtype, question_text,
                answer_text, notes, imported_at, imported_from
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.topic)
        .bind(&record.subtopic)
        .bind(&record.difficulty)
        .bind(&record.qtype)
        .bind(&record.question_text)
        .bind(&record.answer_text)
        .bind(&record.notes)
        .bind(record.imported_at.to_rfc3339())
        .bind(record.imported_from.map(|u| u.to_string()))
        .execute(&self.db)
        .await
        .map_err(dep_err)?;

        Ok(())
    }

    /// Find the production row imported from a given staged record, if
    /// any. Lets a retried import recognize work a crashed run finished
    /// halfway (row inserted, staged record not yet marked).
    pub async fn find_by_origin(&self, staged_record_id: Uuid) -> Result<Option<ProductionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM production_records WHERE imported_from = ?",
            PRODUCTION_COLUMNS
        ))
        .bind(staged_record_id.to_string())
        .fetch_optional(&self.db)
        .await
        .map_err(dep_err)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    /// Soft-supersede: the old record stays queryable but drops out of
    /// detection. Returns false if it was already superseded or missing.
    pub async fn supersede(&self, old_id: &str, new_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE production_records SET superseded_by = ?
             WHERE id = ? AND superseded_by IS NULL",
        )
        .bind(new_id)
        .bind(old_id)
        .execute(&self.db)
        .await
        .map_err(dep_err)?;

        Ok(result.rows_affected() > 0)
    }

    /// Highest existing sequence number for a canonical id base, scanning
    /// ids shaped `{base}-NNN`. Ids with a non-numeric tail are ignored.
    pub async fn max_sequence(&self, base: &str) -> Result<u32> {
        let prefix = format!("{}-", base);
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM production_records WHERE id LIKE ?")
                .bind(format!("{}%", prefix))
                .fetch_all(&self.db)
                .await
                .map_err(dep_err)?;

        let mut max = 0;
        for (id,) in ids {
            if let Some(tail) = id.strip_prefix(&prefix) {
                if let Ok(seq) = tail.parse::<u32>() {
                    max = max.max(seq);
                }
            }
        }
        Ok(max)
    }
}

fn dep_err(e: sqlx::Error) -> Error {
    Error::Dependency(format!("Production corpus unavailable: {}", e))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Dependency(format!("Corrupt timestamp in corpus: {}", e)))
}
