//! Change log persistence
//!
//! The log is append-only: entries are written once and never updated or
//! deleted. SQLite's `AUTOINCREMENT` rowid doubles as the recency marker, so
//! the table behaves as an arena indexed by insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::types::{ChangeEntry, LoggedChange};
use crate::error::{AppError, Result};
use crate::hlc::Hlc;

/// Filter for reading the change log
#[derive(Debug, Clone)]
pub struct ChangeQuery {
    /// Entries of this user plus shared entries (empty `user_id`)
    pub user_id: String,
    /// Only entries whose HLC is at or after this timestamp
    pub since: Option<String>,
    pub limit: u32,
    /// Number of matching entries to skip
    pub offset: u32,
}

/// Append-only store of change entries
#[async_trait]
pub trait ChangeLog: Send + Sync {
    /// Persist one entry and return its recency marker
    async fn append(&self, entry: &ChangeEntry) -> Result<i64>;

    /// Persist a group of entries atomically; markers come back in input order
    async fn append_all(&self, entries: &[ChangeEntry]) -> Result<Vec<i64>>;

    /// Matching entries, most recent first
    async fn query(&self, query: &ChangeQuery) -> Result<Vec<LoggedChange>>;

    /// Total number of entries in the log
    async fn count(&self) -> Result<u64>;
}

/// Change log stored in the `changes` table
#[derive(Clone)]
pub struct SqliteChangeLog {
    pool: SqlitePool,
}

impl SqliteChangeLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeLog for SqliteChangeLog {
    async fn append(&self, entry: &ChangeEntry) -> Result<i64> {
        insert_entry(&self.pool, entry).await
    }

    async fn append_all(&self, entries: &[ChangeEntry]) -> Result<Vec<i64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut seqs = Vec::with_capacity(entries.len());
        for entry in entries {
            seqs.push(insert_entry(&mut *tx, entry).await?);
        }
        tx.commit().await?;

        Ok(seqs)
    }

    async fn query(&self, query: &ChangeQuery) -> Result<Vec<LoggedChange>> {
        let since = query
            .since
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(Hlc::sort_key);

        let rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT seq, table_name, row_id, column_name, value,
                   timestamp, user_id, created
            FROM changes
            WHERE (user_id = ? OR user_id = '')
              AND (? IS NULL OR sort_key >= ?)
            ORDER BY seq DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&query.user_id)
        .bind(&since)
        .bind(&since)
        .bind(i64::from(query.limit))
        .bind(i64::from(query.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_logged()).collect()
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM changes")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}

async fn insert_entry<'e, E>(executor: E, entry: &ChangeEntry) -> Result<i64>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let value = serde_json::to_string(&entry.value)?;

    let result = sqlx::query(
        r#"
        INSERT INTO changes (
            table_name, row_id, column_name, value,
            timestamp, sort_key, user_id, created
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.table)
    .bind(&entry.row_id)
    .bind(&entry.column)
    .bind(value)
    .bind(&entry.timestamp)
    .bind(Hlc::sort_key(&entry.timestamp))
    .bind(&entry.user_id)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    seq: i64,
    table_name: String,
    row_id: String,
    column_name: String,
    value: String,
    timestamp: String,
    user_id: String,
    created: String,
}

impl ChangeRow {
    fn into_logged(self) -> Result<LoggedChange> {
        let value = serde_json::from_str(&self.value)?;
        let created = DateTime::parse_from_rfc3339(&self.created)
            .map_err(|e| AppError::Internal(format!("corrupt change {}: {}", self.seq, e)))?
            .with_timezone(&Utc);

        Ok(LoggedChange {
            seq: self.seq,
            created,
            entry: ChangeEntry {
                table: self.table_name,
                row_id: self.row_id,
                column: self.column_name,
                value,
                timestamp: self.timestamp,
                user_id: self.user_id,
            },
        })
    }
}
