//! Sync data types
//!
//! Defines the column-level change entry and the wire types of the
//! push/pull protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hlc::Hlc;

/// Sentinel column marking a row as deleted
pub const DELETED_COLUMN: &str = "deleted";

/// One column's value at one point in logical time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Logical record collection
    pub table: String,
    /// Record id within the collection
    pub row_id: String,
    /// Mutated field, or `deleted` for a tombstone
    pub column: String,
    /// New value of the column
    #[serde(default)]
    pub value: Value,
    /// HLC timestamp of the change
    #[serde(default)]
    pub timestamp: String,
    /// Actor that produced the change; empty for shared changes
    #[serde(default)]
    pub user_id: String,
}

impl ChangeEntry {
    pub fn new(
        table: impl Into<String>,
        row_id: impl Into<String>,
        column: impl Into<String>,
        value: Value,
        timestamp: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
            column: column.into(),
            value,
            timestamp: timestamp.into(),
            user_id: user_id.into(),
        }
    }

    /// Tombstone entry for a row
    pub fn tombstone(
        table: impl Into<String>,
        row_id: impl Into<String>,
        timestamp: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::new(table, row_id, DELETED_COLUMN, Value::Bool(true), timestamp, user_id)
    }

    pub fn row_key(&self) -> RowKey {
        RowKey::new(&self.table, &self.row_id)
    }

    /// Parsed HLC; `None` when the timestamp cannot be parsed
    pub fn hlc(&self) -> Option<Hlc> {
        Hlc::parse(&self.timestamp).ok()
    }
}

/// A change entry as persisted in the change log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedChange {
    /// Server-side recency marker, strictly increasing in append order
    pub seq: i64,
    /// Wall-clock time of the append
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: ChangeEntry,
}

/// Identity of one row across all tables
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub table: String,
    pub row_id: String,
}

impl RowKey {
    pub fn new(table: &str, row_id: &str) -> Self {
        Self {
            table: table.to_string(),
            row_id: row_id.to_string(),
        }
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table, self.row_id)
    }
}

/// Body of `POST /api/sync`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    pub changes: Option<Vec<ChangeEntry>>,
}

/// Query string of `POST /api/sync`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushQuery {
    pub compress: Option<String>,
}

/// Query string of `GET /api/sync`
///
/// `limit` and `page` stay raw text so a malformed number never hides a
/// missing `user`; see [`parse_count`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullQuery {
    pub user: Option<String>,
    pub timestamp: Option<String>,
    pub limit: Option<String>,
    /// Number of matching entries to skip
    pub page: Option<String>,
    pub compress: Option<String>,
}

/// Response of `GET /api/sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<ChangeEntry>,
    pub count: usize,
    pub compress: bool,
}

/// Plain acknowledgement body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn success() -> Self {
        Self {
            message: "success".to_string(),
        }
    }
}

/// Only the literal `true` turns compaction on
pub fn compress_flag(raw: Option<&str>) -> bool {
    raw == Some("true")
}

/// Leading decimal digits of a count parameter, like `parseInt`.
///
/// Empty, negative or non-numeric input yields `None`; values past
/// `u32::MAX` saturate.
pub fn parse_count(raw: Option<&str>) -> Option<u32> {
    let s = raw?.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    let digits = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits == 0 {
        return None;
    }
    Some(s[..digits].parse().unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_defaults_on_deserialize() {
        let entry: ChangeEntry = serde_json::from_value(json!({
            "table": "notes",
            "row_id": "r1",
            "column": "title"
        }))
        .unwrap();

        assert_eq!(entry.value, Value::Null);
        assert_eq!(entry.timestamp, "");
        assert_eq!(entry.user_id, "");
        assert!(entry.hlc().is_none());
    }

    #[test]
    fn test_tombstone() {
        let entry = ChangeEntry::tombstone("notes", "r1", "2024-05-01T10:00:00.000Z", "u1");
        assert_eq!(entry.column, DELETED_COLUMN);
        assert_eq!(entry.value, Value::Bool(true));
        assert_eq!(entry.row_key().to_string(), "notes:r1");
    }

    #[test]
    fn test_logged_change_flattens_entry() {
        let logged = LoggedChange {
            seq: 3,
            created: Utc::now(),
            entry: ChangeEntry::new("notes", "r1", "title", json!("a"), "t1", ""),
        };

        let json = serde_json::to_value(&logged).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["column"], "title");
        assert_eq!(json["value"], "a");
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(Some("25")), Some(25));
        assert_eq!(parse_count(Some(" 7 ")), Some(7));
        assert_eq!(parse_count(Some("12abc")), Some(12));
        assert_eq!(parse_count(Some("99999999999")), Some(u32::MAX));
        assert_eq!(parse_count(Some("abc")), None);
        assert_eq!(parse_count(Some("-3")), None);
        assert_eq!(parse_count(Some("")), None);
        assert_eq!(parse_count(None), None);
    }

    #[test]
    fn test_compress_flag() {
        assert!(compress_flag(Some("true")));
        assert!(!compress_flag(Some("1")));
        assert!(!compress_flag(None));
    }
}
