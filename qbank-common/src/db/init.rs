//! Database initialization
//!
//! Creates the database file on first run and applies the schema
//! idempotently (CREATE TABLE IF NOT EXISTS), so startup is safe to
//! repeat against an existing database.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_connection(&pool).await?;
    create_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests.
///
/// Limited to a single connection: each new in-memory connection would
/// otherwise see its own empty database.
pub async fn init_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    configure_connection(&pool).await?;
    create_tables(&pool).await?;

    Ok(pool)
}

async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

/// Create all tables (idempotent - safe to call multiple times)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_upload_batches_table(pool).await?;
    create_staged_records_table(pool).await?;
    create_duplicate_candidates_table(pool).await?;
    create_production_records_table(pool).await?;
    Ok(())
}

async fn create_upload_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_batches (
            id TEXT PRIMARY KEY,
            source_filename TEXT NOT NULL,
            submitted_by TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            total_count INTEGER NOT NULL DEFAULT 0,
            pending_count INTEGER NOT NULL DEFAULT 0,
            approved_count INTEGER NOT NULL DEFAULT 0,
            rejected_count INTEGER NOT NULL DEFAULT 0,
            duplicate_count INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            review_started_at TEXT,
            import_completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_upload_batches_status ON upload_batches(status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_staged_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_records (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES upload_batches(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            topic TEXT NOT NULL,
            subtopic TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            qtype TEXT NOT NULL,
            question_text TEXT NOT NULL,
            answer_text TEXT NOT NULL,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            duplicate_of TEXT,
            similarity_score REAL,
            review_notes TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            canonical_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staged_records_batch_status
         ON staged_records(batch_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_duplicate_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_candidates (
            id TEXT PRIMARY KEY,
            staged_record_id TEXT NOT NULL REFERENCES staged_records(id) ON DELETE CASCADE,
            production_id TEXT NOT NULL,
            similarity_score REAL NOT NULL,
            resolution TEXT NOT NULL DEFAULT 'pending',
            resolution_notes TEXT,
            resolved_by TEXT,
            resolved_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (staged_record_id, production_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_duplicate_candidates_record
         ON duplicate_candidates(staged_record_id, resolution)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_production_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS production_records (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            subtopic TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            qtype TEXT NOT NULL,
            question_text TEXT NOT NULL,
            answer_text TEXT NOT NULL,
            notes TEXT,
            superseded_by TEXT,
            imported_at TEXT NOT NULL,
            imported_from TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_production_records_topic
         ON production_records(topic)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_memory_creates_schema() {
        let pool = init_memory().await.unwrap();

        // All four tables exist and are queryable
        for table in [
            "upload_batches",
            "staged_records",
            "duplicate_candidates",
            "production_records",
        ] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let pool = init_memory().await.unwrap();
        create_tables(&pool).await.unwrap();
        create_tables(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_init_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sub").join("qbank.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_batches")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_candidate_pair_unique_constraint() {
        let pool = init_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO upload_batches (id, source_filename, submitted_by, submitted_at)
             VALUES ('b1', 'f.md', 'u', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO staged_records
             (id, batch_id, position, topic, subtopic, difficulty, qtype,
              question_text, answer_text, created_at)
             VALUES ('r1', 'b1', 0, 't', 's', 'Basic', 'Definition', 'q', 'a',
                     '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let insert = "INSERT INTO duplicate_candidates
             (id, staged_record_id, production_id, similarity_score, created_at)
             VALUES (?, 'r1', 'P-1', 0.9, '2026-01-01T00:00:00Z')";
        sqlx::query(insert).bind("c1").execute(&pool).await.unwrap();
        let dup = sqlx::query(insert).bind("c2").execute(&pool).await;
        assert!(dup.is_err());
    }
}
