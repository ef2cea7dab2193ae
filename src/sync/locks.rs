//! Per-row write serialization
//!
//! Pushes and record mutations load a row, modify it and save it back. Two
//! of those interleaving on the same row would lose an update, so each
//! load-mutate-save holds the row's lock for its whole duration. Rows are
//! independent; different keys never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::types::RowKey;

/// Lock entries kept before idle ones are pruned
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct RowLocks {
    locks: Mutex<HashMap<RowKey, Arc<AsyncMutex<()>>>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a row
    pub async fn lock(&self, key: &RowKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the map holds an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.clone()).or_default().clone()
        };

        lock.lock_owned().await
    }

    /// Number of tracked lock entries
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_row_is_serialized() {
        let locks = Arc::new(RowLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let key = RowKey::new("notes", "r1");

        let mut handles = Vec::new();
        for _ in 0..20 {
            let locks = locks.clone();
            let inside = inside.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_rows_do_not_block() {
        let locks = RowLocks::new();
        let _first = locks.lock(&RowKey::new("notes", "r1")).await;
        let _second = locks.lock(&RowKey::new("notes", "r2")).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let locks = RowLocks::new();
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.lock(&RowKey::new("notes", &i.to_string())).await);
        }
        assert_eq!(locks.len(), PRUNE_THRESHOLD);

        let _held = locks.lock(&RowKey::new("notes", "fresh")).await;
        assert_eq!(locks.len(), 1);
    }
}
