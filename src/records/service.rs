//! Record mutations with change capture
//!
//! This is the trigger side of the sync engine: every create, update and
//! delete made through the service is captured into the change log. Capture
//! runs after a create, before an update is committed (so the previous row
//! is still loadable) and after a delete. A failed capture fails the
//! mutation and the record write is undone.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Record, RecordStore};
use crate::error::{AppError, Result};
use crate::hlc::{Hlc, HlcClock};
use crate::sync::{is_reserved_table, ChangeCapture, Mutation, RowKey, RowLocks};

#[derive(Clone)]
pub struct RecordService {
    store: Arc<dyn RecordStore>,
    capture: ChangeCapture,
    clock: Arc<HlcClock>,
    locks: Arc<RowLocks>,
}

impl RecordService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        capture: ChangeCapture,
        clock: Arc<HlcClock>,
        locks: Arc<RowLocks>,
    ) -> Self {
        Self {
            store,
            capture,
            clock,
            locks,
        }
    }

    pub async fn get(&self, table: &str, id: &str) -> Result<Record> {
        self.store.find(table, id).await
    }

    /// Create a record from a JSON body.
    ///
    /// `id`, `hlc` and `user_id` are taken from the body when present; the
    /// id defaults to a fresh UUID and the HLC to the server clock.
    pub async fn create(&self, table: &str, body: Map<String, Value>) -> Result<Record> {
        check_table(table)?;

        let id = str_field(&body, "id")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut record = Record::new(table, &id);
        record.hlc = self.assign_hlc(str_field(&body, "hlc"))?;
        record.apply_patch(&body);

        let _guard = self.locks.lock(&RowKey::new(table, &id)).await;

        match self.store.find(table, &id).await {
            Ok(_) => {
                return Err(AppError::InvalidInput(format!(
                    "record {}/{} already exists",
                    table, id
                )))
            }
            Err(AppError::RecordNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        self.store.insert(&record).await?;

        if let Err(e) = self.capture.capture(Mutation::Create { record: &record }).await {
            tracing::error!("Capture failed for create of {}/{}: {}", table, id, e);
            if let Err(undo) = self.store.delete(table, &id).await {
                tracing::error!("Failed to undo create of {}/{}: {}", table, id, undo);
            }
            return Err(e);
        }

        tracing::info!("Created {}/{}", table, id);
        Ok(record)
    }

    /// Apply a partial update to an existing record
    pub async fn update(&self, table: &str, id: &str, patch: Map<String, Value>) -> Result<Record> {
        check_table(table)?;

        let _guard = self.locks.lock(&RowKey::new(table, id)).await;

        let previous = self.store.find(table, id).await?;
        let mut record = previous.clone();
        record.hlc = self.assign_hlc(str_field(&patch, "hlc"))?;
        record.apply_patch(&patch);
        record.touch();

        let captured = self
            .capture
            .capture(Mutation::Update {
                record: &record,
                previous: &previous,
            })
            .await?;

        self.store.update(&record).await?;

        tracing::info!("Updated {}/{} ({} changed)", table, id, captured.len());
        Ok(record)
    }

    /// Delete a record, optionally stamping the tombstone with a client HLC
    pub async fn delete(&self, table: &str, id: &str, hlc: Option<&str>) -> Result<()> {
        check_table(table)?;

        let _guard = self.locks.lock(&RowKey::new(table, id)).await;

        let mut record = self.store.find(table, id).await?;
        if let Some(raw) = hlc.filter(|s| !s.is_empty()) {
            record.hlc = self.assign_hlc(Some(raw))?;
        }

        self.store.delete(table, id).await?;

        if let Err(e) = self.capture.capture(Mutation::Delete { record: &record }).await {
            tracing::error!("Capture failed for delete of {}/{}: {}", table, id, e);
            if let Err(undo) = self.store.insert(&record).await {
                tracing::error!("Failed to undo delete of {}/{}: {}", table, id, undo);
            }
            return Err(e);
        }

        tracing::info!("Deleted {}/{}", table, id);
        Ok(())
    }

    /// Keep a client-supplied HLC (after folding it into the server clock),
    /// or issue a new one.
    fn assign_hlc(&self, raw: Option<&str>) -> Result<String> {
        match raw {
            Some(raw) => {
                let remote = Hlc::parse(raw)?;
                self.clock.receive(&remote)?;
                Ok(raw.to_string())
            }
            None => Ok(self.clock.now()?.to_string()),
        }
    }
}

fn check_table(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(AppError::InvalidInput("table is required".to_string()));
    }
    if is_reserved_table(table) {
        return Err(AppError::InvalidInput(format!(
            "table name {:?} is reserved",
            table
        )));
    }
    Ok(())
}

fn str_field<'a>(body: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    body.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
