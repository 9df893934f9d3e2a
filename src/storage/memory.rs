//! Volatile slot storage for tests and headless runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::record::{SlotIndex, SlotRecord};
use super::store::{SlotStore, StoreError};
use crate::sync::lock;

/// In-process [`SlotStore`]; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    records: Mutex<HashMap<SlotIndex, SlotRecord>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn load(&self, slot: SlotIndex) -> Result<Option<SlotRecord>, StoreError> {
        Ok(lock(&self.records).get(&slot).cloned())
    }

    async fn save(&self, slot: SlotIndex, record: &SlotRecord) -> Result<(), StoreError> {
        lock(&self.records).insert(slot, record.clone());
        Ok(())
    }

    async fn delete(&self, slot: SlotIndex) -> Result<(), StoreError> {
        lock(&self.records).remove(&slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::Payload;
    use chrono::Utc;

    #[tokio::test]
    async fn save_load_delete() {
        let store = MemorySlotStore::new();
        let slot = SlotIndex::new(6).unwrap();
        let record = SlotRecord::new(Payload::new(vec![1u8], "audio/wav"), Utc::now(), Some(1));

        store.save(slot, &record).await.unwrap();
        assert_eq!(store.load(slot).await.unwrap(), Some(record));
        assert_eq!(store.len(), 1);

        store.delete(slot).await.unwrap();
        store.delete(slot).await.unwrap();
        assert!(store.is_empty());
    }
}
