//! Generic record storage
//!
//! Records are schema-less: a set of metadata fields plus an ordered map of
//! user fields. The store is the materialized latest view of each row; the
//! change log stays the source of truth.
//!
//! - `SqliteRecordStore` persists every logical table in one SQLite table
//! - `RecordService` performs mutations and invokes change capture for them

mod service;
mod sqlite;

pub use service::RecordService;
pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Metadata fields that are never synchronized as columns
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "hlc",
    "deleted",
    "created",
    "updated",
    "collectionId",
    "collectionName",
];

/// Owning user. Stored with the metadata, captured like a user field.
pub const OWNER_FIELD: &str = "user_id";

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

/// One row of a logical table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "collectionName")]
    pub table: String,
    /// HLC of the latest mutation
    pub hlc: String,
    /// Owning user; empty for shared rows
    pub user_id: String,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// User fields in insertion order
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(table: &str, id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            table: table.to_string(),
            hlc: String::new(),
            user_id: String::new(),
            deleted: false,
            created: now,
            updated: now,
            fields: Map::new(),
        }
    }

    /// Set a column by name.
    ///
    /// `deleted` and `user_id` update the metadata; other system fields are
    /// ignored.
    pub fn set(&mut self, column: &str, value: Value) {
        match column {
            "deleted" => self.deleted = value.as_bool().unwrap_or(false),
            OWNER_FIELD => {
                if let Some(user_id) = value.as_str() {
                    self.user_id = user_id.to_string();
                }
            }
            name if is_system_field(name) => {
                tracing::debug!("Ignoring write to system field {} on {}", name, self.table);
            }
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }

    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (column, value) in patch {
            self.set(column, value.clone());
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }
}

/// Storage for records, keyed by `(table, id)`
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load a record; fails with `AppError::RecordNotFound` when absent
    async fn find(&self, table: &str, id: &str) -> Result<Record>;

    async fn insert(&self, record: &Record) -> Result<()>;

    /// Overwrite an existing record; fails with `RecordNotFound` when absent
    async fn update(&self, record: &Record) -> Result<()>;

    async fn delete(&self, table: &str, id: &str) -> Result<()>;
}
