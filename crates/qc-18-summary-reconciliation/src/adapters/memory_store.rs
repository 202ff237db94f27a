//! In-memory summary store.
//!
//! Every mutation runs under one write lock, which gives the same per-row
//! atomicity a quorum-consistent backend provides.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::{StoreError, SummarySnapshot};
use crate::ports::SummaryStore;

/// In-memory implementation of `SummaryStore` for testing and replay.
pub struct InMemorySummaryStore {
    rows: RwLock<HashMap<Address, SummarySnapshot>>,
    unavailable: AtomicBool,
}

impl InMemorySummaryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Write a row unconditionally (test seeding).
    pub fn put(&self, snapshot: SummarySnapshot) {
        self.rows.write().insert(snapshot.key, snapshot);
    }

    /// Read a row without going through the port.
    pub fn get(&self, key: &Address) -> Option<SummarySnapshot> {
        self.rows.read().get(key).cloned()
    }

    /// Copy of every row.
    pub fn snapshot(&self) -> HashMap<Address, SummarySnapshot> {
        self.rows.read().clone()
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

impl Default for InMemorySummaryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn find_by_id(&self, key: &Address) -> Result<Option<SummarySnapshot>, StoreError> {
        self.check_available()?;
        Ok(self.get(key))
    }

    async fn find_all_by_id_in(
        &self,
        keys: &[Address],
    ) -> Result<HashMap<Address, SummarySnapshot>, StoreError> {
        self.check_available()?;
        let rows = self.rows.read();
        Ok(keys
            .iter()
            .filter_map(|key| rows.get(key).map(|row| (*key, row.clone())))
            .collect())
    }

    async fn insert_if_not_exists(&self, snapshot: &SummarySnapshot) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write();
        if rows.contains_key(&snapshot.key) {
            return Ok(false);
        }
        rows.insert(snapshot.key, snapshot.clone());
        Ok(true)
    }

    async fn update(
        &self,
        snapshot: &SummarySnapshot,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write();
        match rows.get_mut(&snapshot.key) {
            Some(row) if row.version == expected_version => {
                *row = snapshot.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &Address) -> Result<(), StoreError> {
        self.check_available()?;
        self.rows.write().remove(key);
        Ok(())
    }

    async fn commit_offset_bump(
        &self,
        key: &Address,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write();
        match rows.get_mut(key) {
            Some(row) if row.version == expected_version => {
                *row = row.committed();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourcePosition, SummaryDelta, SummaryFields};

    const K: Address = [0x0A; 20];

    fn row() -> SummarySnapshot {
        SummarySnapshot::from_delta(&SummaryDelta::new(
            K,
            SummaryFields {
                balance: 7,
                ..SummaryFields::ZERO
            },
            SourcePosition::new("T", 0, 11),
            0,
        ))
    }

    #[tokio::test]
    async fn test_insert_if_not_exists_once() {
        let store = InMemorySummaryStore::new();
        assert!(store.insert_if_not_exists(&row()).await.unwrap());
        assert!(!store.insert_if_not_exists(&row()).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = InMemorySummaryStore::new();
        store.put(row());

        let mut next = row();
        next.version = 1;
        next.fields.balance = 9;
        assert!(!store.update(&next, 5).await.unwrap());
        assert!(store.update(&next, 0).await.unwrap());
        assert_eq!(store.get(&K).unwrap().fields.balance, 9);

        assert!(!store.update(&next, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_row_fails() {
        let store = InMemorySummaryStore::new();
        assert!(!store.update(&row(), 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_offset_bump() {
        let store = InMemorySummaryStore::new();
        store.put(row());

        assert!(!store.commit_offset_bump(&K, 3).await.unwrap());
        assert!(store.commit_offset_bump(&K, 0).await.unwrap());

        let committed = store.get(&K).unwrap();
        assert_eq!(committed.version, 1);
        assert!(committed.offset_committed);
    }

    #[tokio::test]
    async fn test_find_all_skips_missing() {
        let store = InMemorySummaryStore::new();
        store.put(row());

        let found = store.find_all_by_id_in(&[K, [0xFF; 20]]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&K));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemorySummaryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_by_id(&K).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert!(store.remove(&K).await.is_ok());
    }
}
