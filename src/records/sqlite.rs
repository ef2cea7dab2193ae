//! SQLite-backed record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use super::{Record, RecordStore};
use crate::error::{AppError, Result};

/// All logical tables share the `records` table, keyed by `(table_name, id)`
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find(&self, table: &str, id: &str) -> Result<Record> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT table_name, id, hlc, user_id, deleted, data, created, updated
            FROM records
            WHERE table_name = ? AND id = ?
            "#,
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| AppError::record_not_found(table, id))?
            .into_record()
    }

    async fn insert(&self, record: &Record) -> Result<()> {
        let data = serde_json::to_string(&record.fields)?;

        sqlx::query(
            r#"
            INSERT INTO records (table_name, id, hlc, user_id, deleted, data, created, updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.table)
        .bind(&record.id)
        .bind(&record.hlc)
        .bind(&record.user_id)
        .bind(record.deleted)
        .bind(&data)
        .bind(record.created.to_rfc3339())
        .bind(record.updated.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let data = serde_json::to_string(&record.fields)?;

        let result = sqlx::query(
            r#"
            UPDATE records
            SET hlc = ?, user_id = ?, deleted = ?, data = ?, updated = ?
            WHERE table_name = ? AND id = ?
            "#,
        )
        .bind(&record.hlc)
        .bind(&record.user_id)
        .bind(record.deleted)
        .bind(&data)
        .bind(record.updated.to_rfc3339())
        .bind(&record.table)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::record_not_found(&record.table, &record.id));
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM records WHERE table_name = ? AND id = ?")
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::record_not_found(table, id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    table_name: String,
    id: String,
    hlc: String,
    user_id: String,
    deleted: bool,
    data: String,
    created: String,
    updated: String,
}

impl RecordRow {
    fn into_record(self) -> Result<Record> {
        let fields: Map<String, Value> = serde_json::from_str(&self.data)?;

        Ok(Record {
            id: self.id,
            table: self.table_name,
            hlc: self.hlc,
            user_id: self.user_id,
            deleted: self.deleted,
            created: parse_time(&self.created)?,
            updated: parse_time(&self.updated)?,
            fields,
        })
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("corrupt timestamp {:?}: {}", raw, e)))
}
