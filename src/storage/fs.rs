//! Filesystem-backed [`SlotStore`].
//!
//! Layout under the store directory:
//!
//! ```text
//! slots/
//!   slot-0.json   metadata (media type, timestamps, label, colour, trim)
//!   slot-0.bin    raw payload bytes
//!   slot-4.json
//!   slot-4.bin
//! ```
//!
//! A slot exists when its `.json` file exists.  Both files are written to a
//! `.tmp` sibling and renamed into place; the payload goes first so a crash
//! never leaves metadata pointing at a half-written payload.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{SlotIndex, SlotRecord, TrimWindow};
use super::store::{SlotStore, StoreError};
use crate::audio::format::Payload;

#[derive(Debug, Serialize, Deserialize)]
struct SlotMeta {
    media_type: String,
    recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trim_start_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trim_end_sec: Option<f64>,
}

impl SlotMeta {
    fn from_record(record: &SlotRecord) -> Self {
        Self {
            media_type: record.payload.media_type().to_owned(),
            recorded_at: record.recorded_at,
            duration_seconds: record.duration_seconds,
            label: record.label.clone(),
            color: record.color.clone(),
            trim_start_sec: record.trim.map(|t| t.start_sec),
            trim_end_sec: record.trim.map(|t| t.end_sec),
        }
    }

    fn into_record(self, slot: SlotIndex, bytes: Vec<u8>) -> SlotRecord {
        let trim = match (self.trim_start_sec, self.trim_end_sec) {
            (Some(start_sec), Some(end_sec)) if start_sec < end_sec => Some(TrimWindow { start_sec, end_sec }),
            (None, None) => None,
            (start, end) => {
                log::warn!("{slot}: ignoring inconsistent trim bounds {start:?}..{end:?}");
                None
            }
        };

        SlotRecord {
            payload: Payload::new(bytes, self.media_type),
            recorded_at: self.recorded_at,
            duration_seconds: self.duration_seconds,
            label: self.label,
            color: self.color,
            trim,
        }
    }
}

/// Stores each slot as a metadata/payload file pair in one directory.
#[derive(Debug, Clone)]
pub struct FsSlotStore {
    dir: PathBuf,
}

impl FsSlotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self, slot: SlotIndex) -> PathBuf {
        self.dir.join(format!("slot-{}.json", slot.get()))
    }

    fn payload_path(&self, slot: SlotIndex) -> PathBuf {
        self.dir.join(format!("slot-{}.bin", slot.get()))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl SlotStore for FsSlotStore {
    async fn load(&self, slot: SlotIndex) -> Result<Option<SlotRecord>, StoreError> {
        let meta_raw = match tokio::fs::read_to_string(self.meta_path(slot)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: SlotMeta = serde_json::from_str(&meta_raw)?;

        let bytes = match tokio::fs::read(self.payload_path(slot)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Corrupt {
                    slot,
                    reason: "payload file is missing".into(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(meta.into_record(slot, bytes)))
    }

    async fn save(&self, slot: SlotIndex, record: &SlotRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let meta = serde_json::to_vec_pretty(&SlotMeta::from_record(record))?;
        write_atomic(&self.payload_path(slot), record.payload.bytes()).await?;
        write_atomic(&self.meta_path(slot), &meta).await?;

        log::debug!("{slot}: saved {} payload bytes to {}", record.payload.len(), self.dir.display());
        Ok(())
    }

    async fn delete(&self, slot: SlotIndex) -> Result<(), StoreError> {
        remove_if_present(&self.meta_path(slot)).await?;
        remove_if_present(&self.payload_path(slot)).await?;
        log::debug!("{slot}: deleted from {}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn slot(i: usize) -> SlotIndex {
        SlotIndex::new(i).unwrap()
    }

    fn sample_record() -> SlotRecord {
        let mut record = SlotRecord::new(
            Payload::new(vec![1u8, 2, 3, 4], "audio/wav"),
            "2026-03-01T12:00:00Z".parse().unwrap(),
            Some(7),
        );
        record.label = Some("Airhorn".into());
        record.color = Some("#123456".into());
        record.trim = Some(TrimWindow {
            start_sec: 0.5,
            end_sec: 6.25,
        });
        record
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path().join("slots"));
        let record = sample_record();

        store.save(slot(4), &record).await.unwrap();
        let loaded = store.load(slot(4)).await.unwrap();

        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn missing_slot_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path());
        assert_eq!(store.load(slot(0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_all_returns_nine_entries_in_order() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path());
        store.save(slot(2), &sample_record()).await.unwrap();

        let all = store.load_all().await;
        assert_eq!(all.len(), 9);
        assert!(matches!(all[2], Ok(Some(_))));
        assert_eq!(all.iter().filter(|r| matches!(r, Ok(Some(_)))).count(), 1);
    }

    #[tokio::test]
    async fn load_all_isolates_a_corrupt_slot() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path());
        store.save(slot(0), &sample_record()).await.unwrap();
        store.save(slot(5), &sample_record()).await.unwrap();
        std::fs::remove_file(dir.path().join("slot-5.bin")).unwrap();

        let all = store.load_all().await;

        assert!(matches!(all[0], Ok(Some(_))));
        assert!(matches!(all[5], Err(StoreError::Corrupt { .. })));
        assert!(matches!(all[8], Ok(None)));
    }

    #[tokio::test]
    async fn save_replaces_existing_record() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path());
        store.save(slot(1), &sample_record()).await.unwrap();

        let replacement = SlotRecord::new(Payload::new(vec![9u8; 16], "audio/webm"), Utc::now(), None);
        store.save(slot(1), &replacement).await.unwrap();

        let loaded = store.load(slot(1)).await.unwrap().unwrap();
        assert_eq!(loaded.payload.bytes(), &[9u8; 16][..]);
        assert_eq!(loaded.payload.media_type(), "audio/webm");
        assert_eq!(loaded.trim, None);
        assert_eq!(loaded.label, None);
    }

    #[tokio::test]
    async fn delete_removes_both_files_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path());
        store.save(slot(3), &sample_record()).await.unwrap();

        store.delete(slot(3)).await.unwrap();
        store.delete(slot(3)).await.unwrap();

        assert_eq!(store.load(slot(3)).await.unwrap(), None);
        assert!(!dir.path().join("slot-3.bin").exists());
    }

    #[tokio::test]
    async fn missing_payload_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let store = FsSlotStore::new(dir.path());
        store.save(slot(5), &sample_record()).await.unwrap();
        std::fs::remove_file(dir.path().join("slot-5.bin")).unwrap();

        let err = store.load(slot(5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn legacy_metadata_without_duration_loads() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("slot-0.json"),
            r#"{"media_type":"audio/mp4","recorded_at":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("slot-0.bin"), [0u8; 4]).unwrap();

        let store = FsSlotStore::new(dir.path());
        let record = store.load(slot(0)).await.unwrap().unwrap();
        assert_eq!(record.duration_seconds, None);
        assert_eq!(record.trim, None);
    }

    #[tokio::test]
    async fn half_written_trim_is_dropped() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("slot-0.json"),
            r#"{"media_type":"audio/wav","recorded_at":"2025-01-01T00:00:00Z","trim_start_sec":1.0}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("slot-0.bin"), [0u8; 4]).unwrap();

        let store = FsSlotStore::new(dir.path());
        assert_eq!(store.load(slot(0)).await.unwrap().unwrap().trim, None);
    }
}
