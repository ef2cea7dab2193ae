//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::hlc::HlcClock;
use crate::records::{RecordService, SqliteRecordStore};
use crate::sync::{ChangeCapture, RowLocks, SqliteChangeLog, SyncService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    sync: SyncService,
    records: RecordService,
}

impl AppState {
    /// Wire the change log, record store and services over one pool
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let log = Arc::new(SqliteChangeLog::new(db.clone()));
        let store = Arc::new(SqliteRecordStore::new(db.clone()));
        let locks = Arc::new(RowLocks::new());
        let clock = Arc::new(HlcClock::new(config.sync.node_id.clone()));

        let sync = SyncService::new(log.clone(), store.clone(), locks.clone(), &config.sync);
        let records = RecordService::new(store, ChangeCapture::new(log), clock, locks);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                sync,
                records,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn sync(&self) -> &SyncService {
        &self.inner.sync
    }

    pub fn records(&self) -> &RecordService {
        &self.inner.records
    }
}
