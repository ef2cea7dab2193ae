//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Append-only change log; seq is the server-side recency marker
CREATE TABLE IF NOT EXISTS changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    row_id TEXT NOT NULL,
    column_name TEXT NOT NULL,
    value TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    sort_key TEXT NOT NULL,
    user_id TEXT NOT NULL DEFAULT '',
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changes_user_sort ON changes(user_id, sort_key);
CREATE INDEX IF NOT EXISTS idx_changes_row ON changes(table_name, row_id, column_name);

-- Materialized rows of every logical table
CREATE TABLE IF NOT EXISTS records (
    table_name TEXT NOT NULL,
    id TEXT NOT NULL,
    hlc TEXT NOT NULL DEFAULT '',
    user_id TEXT NOT NULL DEFAULT '',
    deleted INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL DEFAULT '{}',
    created TEXT NOT NULL,
    updated TEXT NOT NULL,

    PRIMARY KEY (table_name, id)
);

CREATE INDEX IF NOT EXISTS idx_records_user ON records(user_id);
"#;
