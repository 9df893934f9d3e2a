//! The [`SlotStore`] seam between the board and persistent storage.

use async_trait::async_trait;
use thiserror::Error;

use super::record::{SlotIndex, SlotRecord, SLOT_COUNT};

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("slot metadata could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{slot} is corrupt: {reason}")]
    Corrupt { slot: SlotIndex, reason: String },
}

// ---------------------------------------------------------------------------
// SlotStore trait
// ---------------------------------------------------------------------------

/// Persistent key-value store for slot records, keyed by slot index.
///
/// The board is the only writer; `save` replaces whatever the slot held.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn load(&self, slot: SlotIndex) -> Result<Option<SlotRecord>, StoreError>;

    async fn save(&self, slot: SlotIndex, record: &SlotRecord) -> Result<(), StoreError>;

    /// Removes the slot's record. Deleting an empty slot is not an error.
    async fn delete(&self, slot: SlotIndex) -> Result<(), StoreError>;

    /// All nine slots in index order.  Each slot loads on its own, so one
    /// unreadable slot never hides the others.
    async fn load_all(&self) -> Vec<Result<Option<SlotRecord>, StoreError>> {
        let mut records = Vec::with_capacity(SLOT_COUNT);
        for slot in SlotIndex::all() {
            records.push(self.load(slot).await);
        }
        records
    }
}

// Object-safety check
const _: () = {
    fn _assert_object_safe(_: Box<dyn SlotStore>) {}
};
