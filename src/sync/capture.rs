//! Change capture
//!
//! Turns one record mutation into column-level change entries and appends
//! them to the change log:
//!
//! - create: one entry per user field, plus `user_id` when the row has an owner
//! - update: one entry per user field whose value differs from the stored row,
//!   plus `user_id` when ownership changed
//! - delete: a single `deleted = true` entry
//!
//! Entries carry the record's own HLC, not the time of capture.

use std::sync::Arc;

use serde_json::Value;

use super::store::ChangeLog;
use super::types::ChangeEntry;
use crate::error::Result;
use crate::records::{is_system_field, Record, OWNER_FIELD};

/// Tables whose writes are never captured
pub const RESERVED_TABLES: &[&str] = &["changes", "_collections"];

pub fn is_reserved_table(table: &str) -> bool {
    RESERVED_TABLES.contains(&table)
}

/// A record mutation as seen by the trigger
#[derive(Debug, Clone, Copy)]
pub enum Mutation<'a> {
    Create { record: &'a Record },
    Update { record: &'a Record, previous: &'a Record },
    Delete { record: &'a Record },
}

impl<'a> Mutation<'a> {
    pub fn record(&self) -> &'a Record {
        match *self {
            Mutation::Create { record }
            | Mutation::Update { record, .. }
            | Mutation::Delete { record } => record,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

#[derive(Clone)]
pub struct ChangeCapture {
    log: Arc<dyn ChangeLog>,
}

impl ChangeCapture {
    pub fn new(log: Arc<dyn ChangeLog>) -> Self {
        Self { log }
    }

    /// Entries a mutation produces, without persisting them
    pub fn diff(mutation: &Mutation<'_>) -> Vec<ChangeEntry> {
        let record = mutation.record();
        let entry = |column: &str, value: &Value| {
            ChangeEntry::new(
                &record.table,
                &record.id,
                column,
                value.clone(),
                &record.hlc,
                &record.user_id,
            )
        };

        match mutation {
            Mutation::Create { .. } => {
                let mut entries: Vec<ChangeEntry> = record
                    .fields
                    .iter()
                    .filter(|(column, _)| !is_system_field(column))
                    .map(|(column, value)| entry(column, value))
                    .collect();
                if !record.user_id.is_empty() {
                    entries.push(entry(OWNER_FIELD, &Value::String(record.user_id.clone())));
                }
                entries
            }
            Mutation::Update { previous, .. } => {
                let mut entries: Vec<ChangeEntry> = record
                    .fields
                    .iter()
                    .filter(|(column, _)| !is_system_field(column))
                    .filter(|(column, value)| previous.field(column) != Some(*value))
                    .map(|(column, value)| entry(column, value))
                    .collect();
                // Ownership lives in the metadata but syncs like any column
                if record.user_id != previous.user_id {
                    entries.push(entry(OWNER_FIELD, &Value::String(record.user_id.clone())));
                }
                entries
            }
            Mutation::Delete { .. } => vec![ChangeEntry::tombstone(
                &record.table,
                &record.id,
                &record.hlc,
                &record.user_id,
            )],
        }
    }

    /// Append the mutation's entries to the change log.
    ///
    /// The entries are appended atomically; a failed append fails the whole
    /// capture and nothing is logged.
    pub async fn capture(&self, mutation: Mutation<'_>) -> Result<Vec<ChangeEntry>> {
        let record = mutation.record();
        if is_reserved_table(&record.table) {
            return Ok(Vec::new());
        }

        let entries = Self::diff(&mutation);
        self.log.append_all(&entries).await?;

        tracing::debug!(
            "Captured {} change(s) for {} of {}:{}",
            entries.len(),
            mutation.kind(),
            record.table,
            record.id
        );

        Ok(entries)
    }
}
