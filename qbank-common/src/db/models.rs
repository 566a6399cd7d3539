//! Domain models for the staging pipeline
//!
//! Status enums are persisted as lowercase TEXT; `as_str`/`parse` keep the
//! database representation in one place.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allowed difficulty values for staged records
pub const DIFFICULTIES: &[&str] = &["Basic", "Advanced"];

/// Allowed question types for staged records
pub const QUESTION_TYPES: &[&str] = &[
    "Definition",
    "Problem",
    "GenConcept",
    "Calculation",
    "Analysis",
    "Question",
];

/// Upload batch lifecycle state.
///
/// Moves pending → reviewing → completed; any non-terminal state may move
/// to cancelled. Completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Staged, duplicate detection not yet confirmed complete
    Pending,
    /// Detection complete, human review in progress
    Reviewing,
    /// All approved records imported
    Completed,
    /// Abandoned; terminal
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Reviewing => "reviewing",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(BatchStatus::Pending),
            "reviewing" => Ok(BatchStatus::Reviewing),
            "completed" => Ok(BatchStatus::Completed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            other => Err(Error::Validation(format!("Unknown batch status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Cancelled)
    }
}

/// Staged record review state.
///
/// "duplicate" is derived from unresolved candidates; "imported" is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Approved,
    Rejected,
    Duplicate,
    Imported,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Duplicate => "duplicate",
            RecordStatus::Imported => "imported",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(RecordStatus::Pending),
            "approved" => Ok(RecordStatus::Approved),
            "rejected" => Ok(RecordStatus::Rejected),
            "duplicate" => Ok(RecordStatus::Duplicate),
            "imported" => Ok(RecordStatus::Imported),
            other => Err(Error::Validation(format!(
                "Unknown record status: {}",
                other
            ))),
        }
    }
}

/// Duplicate candidate resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    /// Reject the staged record; the existing production record stands
    KeepExisting,
    /// Approve the staged record; it supersedes the matched production
    /// record at import time
    Replace,
    /// Approve the staged record; both coexist after import
    KeepBoth,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Pending => "pending",
            Resolution::KeepExisting => "keep_existing",
            Resolution::Replace => "replace",
            Resolution::KeepBoth => "keep_both",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Resolution::Pending),
            "keep_existing" => Ok(Resolution::KeepExisting),
            "replace" => Ok(Resolution::Replace),
            "keep_both" => Ok(Resolution::KeepBoth),
            other => Err(Error::Validation(format!("Unknown resolution: {}", other))),
        }
    }
}

/// Upload batch with derived per-status counts.
///
/// Counts are recomputed from record statuses after every mutation, never
/// incremented; `approved_count` includes imported records so the counts
/// keep summing to `total_count` after import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatch {
    pub id: Uuid,
    pub source_filename: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub total_count: i64,
    pub pending_count: i64,
    pub approved_count: i64,
    pub rejected_count: i64,
    pub duplicate_count: i64,
    pub notes: Option<String>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub import_completed_at: Option<DateTime<Utc>>,
}

/// A question awaiting human review, exclusively owned by its batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// Stable ordering within the batch
    pub position: i64,
    pub topic: String,
    pub subtopic: String,
    pub difficulty: String,
    pub qtype: String,
    pub question_text: String,
    pub answer_text: String,
    pub notes: Option<String>,
    pub status: RecordStatus,
    /// Best-scoring production match while flagged as duplicate
    pub duplicate_of: Option<String>,
    pub similarity_score: Option<f64>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Canonical production id, assigned at import
    pub canonical_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A detected (staged, production) pairing pending resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub id: Uuid,
    pub staged_record_id: Uuid,
    pub production_id: String,
    pub similarity_score: f64,
    pub resolution: Resolution,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A question in the production corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionRecord {
    /// Canonical id, e.g. `DCF-WACC-B-G-001`
    pub id: String,
    pub topic: String,
    pub subtopic: String,
    pub difficulty: String,
    pub qtype: String,
    pub question_text: String,
    pub answer_text: String,
    pub notes: Option<String>,
    /// Canonical id of the record that replaced this one (soft supersede);
    /// superseded records are excluded from duplicate detection
    pub superseded_by: Option<String>,
    pub imported_at: DateTime<Utc>,
    /// Staged record this row was imported from, if any
    pub imported_from: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Reviewing,
            BatchStatus::Completed,
            BatchStatus::Cancelled,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()).unwrap(), status);
        }
        for status in [
            RecordStatus::Pending,
            RecordStatus::Approved,
            RecordStatus::Rejected,
            RecordStatus::Duplicate,
            RecordStatus::Imported,
        ] {
            assert_eq!(RecordStatus::parse(status.as_str()).unwrap(), status);
        }
        for resolution in [
            Resolution::Pending,
            Resolution::KeepExisting,
            Resolution::Replace,
            Resolution::KeepBoth,
        ] {
            assert_eq!(Resolution::parse(resolution.as_str()).unwrap(), resolution);
        }
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(BatchStatus::parse("archived").is_err());
        assert!(RecordStatus::parse("deleted").is_err());
        assert!(Resolution::parse("merge").is_err());
    }

    #[test]
    fn test_terminal_batch_states() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Reviewing.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_serde_names_match_db_representation() {
        let json = serde_json::to_string(&Resolution::KeepExisting).unwrap();
        assert_eq!(json, "\"keep_existing\"");
        let json = serde_json::to_string(&BatchStatus::Reviewing).unwrap();
        assert_eq!(json, "\"reviewing\"");
    }
}
