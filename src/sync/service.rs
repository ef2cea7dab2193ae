//! Push and pull handling
//!
//! Push takes a client batch, optionally compacts it, folds it into one
//! column map per row and upserts each row. Rows are independent units of
//! work: a failing row is logged and skipped while the rest of the batch
//! proceeds. Pull reads the change log for one user, optionally compacted.
//!
//! A row's entries are logged (all or none) before its record is saved. The
//! log is the source of truth: if the save then fails, the entries stay
//! visible to pull and the stored record catches up on the row's next push.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::locks::RowLocks;
use super::merge::compact;
use super::store::{ChangeLog, ChangeQuery};
use super::types::{
    compress_flag, parse_count, ChangeEntry, PullQuery, PullResponse, PushRequest, RowKey,
};
use crate::config::SyncConfig;
use crate::error::{AppError, Result};
use crate::hlc::Hlc;
use crate::records::{Record, RecordStore};

/// Summary of one push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub rows_applied: usize,
    pub rows_failed: usize,
    pub entries_applied: usize,
}

/// Changes for one row within a push batch
struct RowGroup {
    key: RowKey,
    /// Last-in-wins fold of the batch's values
    columns: Map<String, Value>,
    entries: Vec<ChangeEntry>,
}

#[derive(Clone)]
pub struct SyncService {
    log: Arc<dyn ChangeLog>,
    records: Arc<dyn RecordStore>,
    locks: Arc<RowLocks>,
    default_page_size: u32,
    max_page_size: u32,
}

impl SyncService {
    pub fn new(
        log: Arc<dyn ChangeLog>,
        records: Arc<dyn RecordStore>,
        locks: Arc<RowLocks>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            log,
            records,
            locks,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size.max(1),
        }
    }

    /// Apply a pushed batch.
    ///
    /// Entries go into the change log as received and rows are written to
    /// the record store directly, so no change capture runs for them.
    pub async fn push(&self, request: PushRequest, compress: bool) -> Result<PushOutcome> {
        let changes = request
            .changes
            .ok_or_else(|| AppError::InvalidInput("changes field required".to_string()))?;

        let received = changes.len();
        let batch = if compress { compact(changes) } else { changes };

        let mut outcome = PushOutcome::default();
        for group in group_rows(batch) {
            match self.apply_row(&group).await {
                Ok(()) => {
                    outcome.rows_applied += 1;
                    outcome.entries_applied += group.entries.len();
                }
                Err(e) => {
                    tracing::warn!("Failed to apply pushed changes for {}: {}", group.key, e);
                    outcome.rows_failed += 1;
                }
            }
        }

        tracing::info!(
            "Push: {} received, {} applied to {} row(s), {} row(s) failed (compress={})",
            received,
            outcome.entries_applied,
            outcome.rows_applied,
            outcome.rows_failed,
            compress
        );

        Ok(outcome)
    }

    async fn apply_row(&self, group: &RowGroup) -> Result<()> {
        let _guard = self.locks.lock(&group.key).await;

        self.log.append_all(&group.entries).await?;

        let latest = group
            .entries
            .iter()
            .filter_map(|e| e.hlc().map(|hlc| (hlc, &e.timestamp)))
            .max_by(|a, b| a.0.cmp(&b.0));

        let RowKey { table, row_id } = &group.key;
        match self.records.find(table, row_id).await {
            Ok(mut record) => {
                record.apply_patch(&group.columns);
                if let Some((hlc, timestamp)) = latest {
                    if Hlc::parse(&record.hlc).map_or(true, |current| hlc > current) {
                        record.hlc = timestamp.clone();
                    }
                }
                record.touch();
                tracing::debug!("Updating {} with {} column(s)", group.key, group.columns.len());
                self.records.update(&record).await
            }
            Err(AppError::RecordNotFound { .. }) => {
                let mut record = Record::new(table, row_id);
                if let Some(first) = group.entries.first() {
                    record.user_id = first.user_id.clone();
                }
                record.apply_patch(&group.columns);
                if let Some((_, timestamp)) = latest {
                    record.hlc = timestamp.clone();
                }
                tracing::debug!("Creating {} with {} column(s)", group.key, group.columns.len());
                self.records.insert(&record).await
            }
            Err(e) => Err(e),
        }
    }

    /// Read changes visible to a user
    pub async fn pull(&self, query: PullQuery) -> Result<PullResponse> {
        let user_id = query
            .user
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::InvalidInput("user is required".to_string()))?;
        let compress = compress_flag(query.compress.as_deref());
        let limit = parse_count(query.limit.as_deref())
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        // `page` counts entries, not pages
        let offset = parse_count(query.page.as_deref()).unwrap_or(0);

        let logged = self
            .log
            .query(&ChangeQuery {
                user_id,
                since: query.timestamp,
                limit,
                offset,
            })
            .await?;

        let mut changes: Vec<ChangeEntry> = logged.into_iter().map(|l| l.entry).collect();
        if compress {
            // Compaction breaks ties by insertion order, oldest first
            changes.reverse();
            changes = compact(changes);
            changes.reverse();
        }

        Ok(PullResponse {
            count: changes.len(),
            changes,
            compress,
        })
    }
}

/// Group a batch by row in first-appearance order
fn group_rows(batch: Vec<ChangeEntry>) -> Vec<RowGroup> {
    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut groups: Vec<RowGroup> = Vec::new();

    for entry in batch {
        let key = entry.row_key();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(RowGroup {
                key,
                columns: Map::new(),
                entries: Vec::new(),
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.columns.insert(entry.column.clone(), entry.value.clone());
        group.entries.push(entry);
    }

    groups
}
