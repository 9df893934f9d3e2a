//! Persistence for the nine slots.
//!
//! [`SlotStore`] is the async seam; [`FsSlotStore`] keeps one metadata file
//! and one payload file per slot, [`MemorySlotStore`] keeps everything in
//! memory.

pub mod fs;
pub mod memory;
pub mod record;
pub mod store;

pub use fs::FsSlotStore;
pub use memory::MemorySlotStore;
pub use record::{SlotIndex, SlotRangeError, SlotRecord, TrimWindow, SLOT_COUNT};
pub use store::{SlotStore, StoreError};
