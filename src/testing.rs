//! Store doubles that fail on demand

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::records::{Record, RecordStore, SqliteRecordStore};
use crate::sync::{ChangeEntry, ChangeLog, ChangeQuery, LoggedChange, SqliteChangeLog};

/// Change log whose appends fail while `failing` is set
pub struct FlakyLog {
    inner: SqliteChangeLog,
    failing: AtomicBool,
}

impl FlakyLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteChangeLog::new(pool),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("change log unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeLog for FlakyLog {
    async fn append(&self, entry: &ChangeEntry) -> Result<i64> {
        self.check()?;
        self.inner.append(entry).await
    }

    async fn append_all(&self, entries: &[ChangeEntry]) -> Result<Vec<i64>> {
        self.check()?;
        self.inner.append_all(entries).await
    }

    async fn query(&self, query: &ChangeQuery) -> Result<Vec<LoggedChange>> {
        self.inner.query(query).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// Record store that refuses to save one row id
pub struct RejectingStore {
    inner: SqliteRecordStore,
    row_id: String,
}

impl RejectingStore {
    pub fn new(pool: SqlitePool, row_id: &str) -> Self {
        Self {
            inner: SqliteRecordStore::new(pool),
            row_id: row_id.to_string(),
        }
    }

    fn check(&self, record: &Record) -> Result<()> {
        if record.id == self.row_id {
            return Err(AppError::Internal(format!("cannot save {}", record.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RejectingStore {
    async fn find(&self, table: &str, id: &str) -> Result<Record> {
        self.inner.find(table, id).await
    }

    async fn insert(&self, record: &Record) -> Result<()> {
        self.check(record)?;
        self.inner.insert(record).await
    }

    async fn update(&self, record: &Record) -> Result<()> {
        self.check(record)?;
        self.inner.update(record).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.inner.delete(table, id).await
    }
}
