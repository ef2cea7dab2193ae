//! Sync module for offline-first multi-client synchronization
//!
//! Provides:
//! - Column-level change entries ordered by HLC timestamps
//! - Change capture for record mutations
//! - An append-only change log
//! - Push/pull sync operations with optional compaction
//!
//! # Sync Protocol
//!
//! 1. Local mutations are captured as one entry per changed column
//! 2. Client sends its entries with `POST /api/sync`
//! 3. Server logs them and upserts the affected rows
//! 4. Client reads entries from other clients with `GET /api/sync`
//! 5. Client merges pulled entries into its own store
//!
//! # Conflict Resolution
//!
//! - Every column is a last-write-wins register keyed by HLC
//! - Deletion is the `deleted` column and follows the same rule
//! - Equal timestamps go to the entry inserted later

mod capture;
mod locks;
mod merge;
mod service;
mod store;
mod types;

pub use capture::{is_reserved_table, ChangeCapture, Mutation, RESERVED_TABLES};
pub use locks::RowLocks;
pub use merge::{compact, resolve, ColumnValue, MergedRow};
pub use service::{PushOutcome, SyncService};
pub use store::{ChangeLog, ChangeQuery, SqliteChangeLog};
pub use types::{
    compress_flag, parse_count, ChangeEntry, LoggedChange, MessageResponse, PullQuery,
    PullResponse, PushQuery, PushRequest, RowKey, DELETED_COLUMN,
};
