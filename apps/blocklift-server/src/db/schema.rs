//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Resume records (one per target with an interrupted upload)
CREATE TABLE IF NOT EXISTS resume_records (
    target_name TEXT PRIMARY KEY,
    uploaded_size INTEGER NOT NULL,
    block_ids TEXT NOT NULL DEFAULT '[]',
    phase TEXT NOT NULL DEFAULT 'staging',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resume_records_updated ON resume_records(updated_at);
"#;
