//! Last-write-wins merge resolution
//!
//! Every `(table, row_id, column)` key is an independent LWW register: the
//! entry with the greatest HLC wins. Equal timestamps resolve to the entry
//! seen later in input order, so callers feed entries in insertion order to
//! get reproducible results. A timestamp that cannot be parsed loses to any
//! parseable one.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use super::types::{ChangeEntry, RowKey, DELETED_COLUMN};
use crate::hlc::Hlc;

/// Winning value of one column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub value: Value,
    pub timestamp: String,
    pub user_id: String,
    hlc: Option<Hlc>,
}

impl ColumnValue {
    fn from_entry(entry: &ChangeEntry) -> Self {
        Self {
            value: entry.value.clone(),
            timestamp: entry.timestamp.clone(),
            user_id: entry.user_id.clone(),
            hlc: entry.hlc(),
        }
    }
}

/// Current state of one row, derived from its change entries
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub table: String,
    pub row_id: String,
    columns: BTreeMap<String, ColumnValue>,
}

impl MergedRow {
    pub fn new(table: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Fold one entry into the view. Entries for other rows are ignored.
    pub fn apply(&mut self, entry: &ChangeEntry) {
        if entry.table != self.table || entry.row_id != self.row_id {
            tracing::debug!(
                "Ignoring entry for {}:{} while merging {}:{}",
                entry.table,
                entry.row_id,
                self.table,
                self.row_id
            );
            return;
        }
        self.offer(&entry.column, ColumnValue::from_entry(entry));
    }

    /// Merge another view of the same row, `other` counting as later input
    pub fn merge(&mut self, other: &MergedRow) {
        if other.table != self.table || other.row_id != self.row_id {
            return;
        }
        for (column, candidate) in &other.columns {
            self.offer(column, candidate.clone());
        }
    }

    fn offer(&mut self, column: &str, candidate: ColumnValue) {
        let replace = match self.columns.get(column) {
            Some(current) => candidate.hlc >= current.hlc,
            None => true,
        };
        if replace {
            self.columns.insert(column.to_string(), candidate);
        }
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).map(|c| &c.value)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), &v.value))
    }

    pub fn is_deleted(&self) -> bool {
        self.value(DELETED_COLUMN)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// One entry per column, carrying the winning value and timestamp
    pub fn to_entries(&self) -> Vec<ChangeEntry> {
        self.columns
            .iter()
            .map(|(column, winner)| {
                ChangeEntry::new(
                    &self.table,
                    &self.row_id,
                    column,
                    winner.value.clone(),
                    &winner.timestamp,
                    &winner.user_id,
                )
            })
            .collect()
    }
}

/// Resolve entries into one merged view per row, in first-appearance order
pub fn resolve<'a>(entries: impl IntoIterator<Item = &'a ChangeEntry>) -> Vec<MergedRow> {
    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut rows: Vec<MergedRow> = Vec::new();

    for entry in entries {
        let slot = *index.entry(entry.row_key()).or_insert_with(|| {
            rows.push(MergedRow::new(&entry.table, &entry.row_id));
            rows.len() - 1
        });
        rows[slot].apply(entry);
    }

    rows
}

/// Keep only the winning entry per `(table, row_id, column)`.
///
/// Survivors keep their relative input order.
pub fn compact(entries: Vec<ChangeEntry>) -> Vec<ChangeEntry> {
    let mut winners: HashMap<(RowKey, String), (usize, Option<Hlc>)> = HashMap::new();

    for (idx, entry) in entries.iter().enumerate() {
        let hlc = entry.hlc();
        let key = (entry.row_key(), entry.column.clone());
        let replace = match winners.get(&key) {
            Some((_, best)) => hlc >= *best,
            None => true,
        };
        if replace {
            winners.insert(key, (idx, hlc));
        }
    }

    let keep: HashSet<usize> = winners.into_values().map(|(idx, _)| idx).collect();

    entries
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keep.contains(idx))
        .map(|(_, entry)| entry)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T1: &str = "2024-05-01T10:00:00.000Z-0000-a";
    const T2: &str = "2024-05-01T10:00:01.000Z-0000-a";
    const T3: &str = "2024-05-01T10:00:02.000Z-0000-b";

    fn entry(row: &str, column: &str, value: Value, ts: &str) -> ChangeEntry {
        ChangeEntry::new("notes", row, column, value, ts, "u1")
    }

    fn single(entries: &[ChangeEntry]) -> MergedRow {
        let mut rows = resolve(entries);
        assert_eq!(rows.len(), 1);
        rows.remove(0)
    }

    #[test]
    fn test_latest_timestamp_wins_per_column() {
        let rows = single(&[
            entry("r1", "title", json!("new"), T2),
            entry("r1", "title", json!("old"), T1),
            entry("r1", "body", json!("b"), T1),
        ]);

        assert_eq!(rows.value("title"), Some(&json!("new")));
        assert_eq!(rows.value("body"), Some(&json!("b")));
        assert_eq!(rows.column("title").unwrap().timestamp, T2);
    }

    #[test]
    fn test_space_separated_timestamps_compare_as_instants() {
        let row = single(&[
            entry("r1", "title", json!("later"), "2024-05-01 10:00:05.000Z"),
            entry("r1", "title", json!("earlier"), "2024-05-01T10:00:01.000Z"),
        ]);
        assert_eq!(row.value("title"), Some(&json!("later")));
    }

    #[test]
    fn test_tie_goes_to_later_input() {
        let row = single(&[
            entry("r1", "title", json!("first"), T1),
            entry("r1", "title", json!("second"), T1),
        ]);
        assert_eq!(row.value("title"), Some(&json!("second")));
    }

    #[test]
    fn test_unparseable_timestamp_loses() {
        let row = single(&[
            entry("r1", "title", json!("valid"), T1),
            entry("r1", "title", json!("garbage"), "not-a-time"),
        ]);
        assert_eq!(row.value("title"), Some(&json!("valid")));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let entries = vec![
            entry("r1", "title", json!("a"), T1),
            entry("r1", "title", json!("b"), T2),
            entry("r1", "body", json!("c"), T3),
        ];
        let once = single(&entries);
        let twice = single(&once.to_entries());
        assert_eq!(once, twice);

        let mut doubled = entries.clone();
        doubled.extend(entries);
        assert_eq!(single(&doubled), once);
    }

    #[test]
    fn test_resolve_is_commutative() {
        let a = entry("r1", "title", json!("a"), T1);
        let b = entry("r1", "title", json!("b"), T2);

        assert_eq!(single(&[a.clone(), b.clone()]), single(&[b, a]));
    }

    #[test]
    fn test_merging_partitions_matches_whole() {
        let all = vec![
            entry("r1", "title", json!("a"), T1),
            entry("r1", "body", json!("x"), T3),
            entry("r1", "title", json!("b"), T2),
            entry("r1", "body", json!("y"), T1),
        ];

        let whole = single(&all);

        let mut left = single(&all[..2]);
        let right = single(&all[2..]);
        left.merge(&right);
        assert_eq!(left, whole);

        let mut right_first = single(&all[2..]);
        right_first.merge(&single(&all[..2]));
        assert_eq!(right_first, whole);
    }

    #[test]
    fn test_delete_and_resurrect() {
        let mut row = single(&[
            entry("r1", "title", json!("a"), T1),
            ChangeEntry::tombstone("notes", "r1", T2, "u1"),
        ]);
        assert!(row.is_deleted());

        row.apply(&entry("r1", DELETED_COLUMN, json!(false), T3));
        assert!(!row.is_deleted());

        row.apply(&ChangeEntry::tombstone("notes", "r1", T1, "u1"));
        assert!(!row.is_deleted());
    }

    #[test]
    fn test_resolve_groups_rows_in_first_appearance_order() {
        let rows = resolve(&[
            entry("r2", "title", json!("x"), T1),
            entry("r1", "title", json!("y"), T1),
            entry("r2", "body", json!("z"), T1),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_id, "r2");
        assert_eq!(rows[0].columns().count(), 2);
        assert_eq!(rows[1].row_id, "r1");
    }

    #[test]
    fn test_compact_keeps_one_entry_per_column() {
        let entries = vec![
            entry("r1", "title", json!("a"), T1),
            entry("r1", "body", json!("x"), T1),
            entry("r1", "title", json!("b"), T3),
            entry("r2", "title", json!("z"), T2),
            entry("r1", "title", json!("c"), T2),
        ];

        let compacted = compact(entries);
        assert_eq!(
            compacted,
            vec![
                entry("r1", "body", json!("x"), T1),
                entry("r1", "title", json!("b"), T3),
                entry("r2", "title", json!("z"), T2),
            ]
        );
    }

    #[test]
    fn test_compact_tie_keeps_later_entry() {
        let compacted = compact(vec![
            entry("r1", "title", json!("first"), T1),
            entry("r1", "title", json!("second"), T1),
        ]);
        assert_eq!(compacted, vec![entry("r1", "title", json!("second"), T1)]);
    }

    #[test]
    fn test_compaction_preserves_winners() {
        let entries = vec![
            entry("r1", "title", json!("a"), T2),
            entry("r1", "title", json!("b"), T1),
            entry("r1", "body", json!("x"), T3),
            entry("r1", "body", json!("y"), T3),
            entry("r1", DELETED_COLUMN, json!(true), T1),
        ];

        let full = single(&entries);
        let compacted = single(&compact(entries));
        assert_eq!(full, compacted);
    }
}
