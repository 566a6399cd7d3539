//! Database query layer
//!
//! Runtime sqlx queries over the shared schema. UUIDs are stored as TEXT,
//! timestamps as RFC 3339 strings; parse helpers below surface corrupt
//! values as internal errors instead of panicking.

pub mod batches;
pub mod candidates;
pub mod corpus;
pub mod records;

pub use corpus::CorpusStore;

use chrono::{DateTime, Utc};
use qbank_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp in column {}: {}", column, e)))
}

pub(crate) fn parse_opt_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}
