use super::SegmentStore;
use crate::core::{ReplayError, Result, Sequence};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local segment store.
///
/// Clones share the same records, so a splitter and a scheduler running in
/// the same process can hand segments over through it.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentStore {
    records: Arc<RwLock<BTreeMap<Sequence, Vec<u8>>>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SegmentStore for MemorySegmentStore {
    async fn put(&self, sequence: Sequence, bytes: &[u8]) -> Result<()> {
        self.records.write().await.insert(sequence, bytes.to_vec());
        Ok(())
    }

    async fn get(&self, sequence: Sequence) -> Result<Vec<u8>> {
        self.records
            .read()
            .await
            .get(&sequence)
            .cloned()
            .ok_or(ReplayError::NotFound(sequence))
    }

    async fn delete(&self, sequence: Sequence) -> Result<()> {
        self.records.write().await.remove(&sequence);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Sequence>> {
        Ok(self.records.read().await.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u64) -> Sequence {
        Sequence::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemorySegmentStore::new();
        store.put(seq(1), b"INSERT INTO t VALUES (1);\n").await.unwrap();

        assert_eq!(store.get(seq(1)).await.unwrap(), b"INSERT INTO t VALUES (1);\n");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemorySegmentStore::new();
        let err = store.get(seq(3)).await.unwrap_err();
        assert!(matches!(err, ReplayError::NotFound(s) if s == seq(3)));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemorySegmentStore::new();
        for n in [3, 1, 2] {
            store.put(seq(n), b"x").await.unwrap();
        }
        store.delete(seq(2)).await.unwrap();
        store.delete(seq(9)).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![seq(1), seq(3)]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let store = MemorySegmentStore::new();
        let other = store.clone();
        store.put(seq(1), b"x").await.unwrap();
        assert!(!other.is_empty().await);
    }
}
