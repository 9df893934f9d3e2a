//! Soundboard orchestrator — routes taps and auxiliary actions to the audio
//! managers, the store and the tile state machine.
//!
//! # Tap routing
//!
//! ```text
//! tap(slot)
//!   ├─ Empty      → acquire mic → Recorder::start           [Recording]
//!   │                 └─ Err → CaptureFailed                [Error]
//!   ├─ Recording  → RecordingHandle::stop                   [Saving]
//!   │                 └─ on_complete → store.save           [HasSound | Error]
//!   ├─ Saving     → ignored
//!   ├─ HasSound   → PlaybackManager::play                   [Playing]
//!   │                 ├─ natural end                        [HasSound]
//!   │                 └─ Err → DecodeFailed, record kept    [Error]
//!   ├─ Playing    → stop + play from trim start             [Playing]
//!   ├─ Error(none) → Retry, then as Empty
//!   └─ Error(rec) → ignored
//! ```
//!
//! [`Soundboard`] is a cheap `Clone` (all `Arc`s).  [`Soundboard::run`]
//! consumes [`BoardCommand`]s and handles each on its own task, so a slow
//! decode or save on one slot never holds up another.  The board lock is
//! only taken for short synchronous sections, never across an `.await`.
//! Edits that read a record, save it and publish it back hold that slot's
//! edit lock for the whole sequence, so concurrent edits never drop each
//! other's changes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::audio::capture::CaptureManager;
use crate::audio::format::{file_extension, media_type_for_extension, EncodeError, Payload, FALLBACK_MEDIA_TYPE};
use crate::audio::player::{EndedCallback, PlaybackError, PlaybackManager, PlaybackStarted};
use crate::audio::recorder::{CompletionCallback, Recorder, Recording, RecordingHandle, WarningCallback};
use crate::audio::trim::{apply_trim, find_trim_window, DEFAULT_SILENCE_THRESHOLD};
use crate::storage::record::is_valid_color;
use crate::storage::{SlotIndex, SlotRecord, SlotStore, StoreError, TrimWindow, SLOT_COUNT};
use crate::sync::lock;

use super::state::{BoardState, SharedBoard, Tile, TileEvent};

const SAVE_FAILED: &str = "Saving failed.";
const PLAYBACK_FAILED: &str = "Playback failed. The file may be damaged.";
const LOAD_FAILED: &str = "Saved sound could not be loaded.";

// ---------------------------------------------------------------------------
// Commands, events, errors
// ---------------------------------------------------------------------------

/// Requests from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardCommand {
    Tap(SlotIndex),
    Delete(SlotIndex),
    Rerecord(SlotIndex),
    Trim(SlotIndex),
    Rename(SlotIndex, Option<String>),
    Recolor(SlotIndex, Option<String>),
    Export(SlotIndex),
    Import(SlotIndex, PathBuf),
}

/// Notifications for visual consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    RecordingStarted { slot: SlotIndex },
    RecordingWarning { slot: SlotIndex },
    PlaybackStarted { slot: SlotIndex, started: PlaybackStarted },
    PlaybackEnded { slot: SlotIndex },
    /// Human-readable outcome of an auxiliary action.
    Notice { slot: SlotIndex, message: String },
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{0} has no recording")]
    NoRecord(SlotIndex),

    #[error("{0} is busy recording or saving")]
    Busy(SlotIndex),

    #[error("invalid colour {0:?}; expected #rgb or #rrggbb")]
    InvalidColor(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of [`Soundboard::trim`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrimOutcome {
    Trimmed(TrimWindow),
    /// Silent or too short; the record is unchanged.
    NothingToTrim,
}

enum TapAction {
    Record,
    Stop(RecordingHandle),
    Play(SlotRecord),
    Retry,
    Ignore,
}

// ---------------------------------------------------------------------------
// Soundboard
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Soundboard {
    board: SharedBoard,
    capture: Arc<CaptureManager>,
    recorder: Arc<Recorder>,
    playback: Arc<PlaybackManager>,
    store: Arc<dyn SlotStore>,
    edits: Arc<[AsyncMutex<()>; SLOT_COUNT]>,
    events: Option<mpsc::UnboundedSender<BoardEvent>>,
    trim_threshold: f32,
    export_dir: PathBuf,
}

impl Soundboard {
    pub fn new(
        board: SharedBoard,
        capture: Arc<CaptureManager>,
        recorder: Arc<Recorder>,
        playback: Arc<PlaybackManager>,
        store: Arc<dyn SlotStore>,
    ) -> Self {
        Self {
            board,
            capture,
            recorder,
            playback,
            store,
            edits: Arc::new(std::array::from_fn(|_| AsyncMutex::new(()))),
            events: None,
            trim_threshold: DEFAULT_SILENCE_THRESHOLD,
            export_dir: PathBuf::from("."),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<BoardEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_trim_threshold(mut self, threshold: f32) -> Self {
        self.trim_threshold = threshold;
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn state(&self) -> SharedBoard {
        Arc::clone(&self.board)
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Handles commands until the sender side is dropped.
    pub async fn run(self, mut commands: mpsc::Receiver<BoardCommand>) {
        log::info!("soundboard ready");
        while let Some(command) = commands.recv().await {
            let board = self.clone();
            tokio::spawn(async move { board.handle(command).await });
        }
        log::info!("command channel closed; soundboard stopping");
    }

    async fn handle(&self, command: BoardCommand) {
        match command {
            BoardCommand::Tap(slot) => self.tap(slot).await,
            BoardCommand::Delete(slot) => {
                let result = self.delete(slot).await;
                self.report(slot, "Deleted.", result);
            }
            BoardCommand::Rerecord(slot) => {
                if let Err(e) = self.rerecord(slot).await {
                    self.report_err(slot, e);
                }
            }
            BoardCommand::Trim(slot) => match self.trim(slot).await {
                Ok(TrimOutcome::Trimmed(w)) => {
                    self.notice(slot, format!("Trimmed to {:.2}s..{:.2}s.", w.start_sec, w.end_sec))
                }
                Ok(TrimOutcome::NothingToTrim) => self.notice(slot, "Nothing to trim.".into()),
                Err(e) => self.report_err(slot, e),
            },
            BoardCommand::Rename(slot, label) => {
                let result = self.rename(slot, label).await;
                self.report(slot, "Renamed.", result);
            }
            BoardCommand::Recolor(slot, color) => {
                let result = self.recolor(slot, color).await;
                self.report(slot, "Colour changed.", result);
            }
            BoardCommand::Export(slot) => {
                let dir = self.export_dir.clone();
                match self.export(slot, &dir).await {
                    Ok(path) => self.notice(slot, format!("Exported to {}.", path.display())),
                    Err(e) => self.report_err(slot, e),
                }
            }
            BoardCommand::Import(slot, path) => {
                let result = self.import(slot, &path).await;
                self.report(slot, "Imported.", result);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Start-up
    // -----------------------------------------------------------------------

    /// Rehydrates all tiles from the store.  Slots that cannot be read come
    /// up as `Error` tiles without a record; the rest load normally.
    pub async fn load(&self) {
        let records = self.store.load_all().await;
        let mut board = self.lock();
        let (mut loaded, mut failed) = (0, 0);
        for (slot, record) in SlotIndex::all().zip(records) {
            match record {
                Ok(Some(record)) => {
                    if board.apply(slot, TileEvent::Loaded(record)) {
                        loaded += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("{slot}: saved sound unreadable: {e}");
                    if board.apply(slot, TileEvent::LoadFailed(LOAD_FAILED.into())) {
                        failed += 1;
                    }
                }
            }
        }
        log::info!("loaded {loaded} recorded slot(s), {failed} unreadable");
    }

    // -----------------------------------------------------------------------
    // Tap
    // -----------------------------------------------------------------------

    pub async fn tap(&self, slot: SlotIndex) {
        self.ensure_output().await;

        let action = {
            let board = self.lock();
            match &board.tile(slot).tile {
                Tile::Empty => TapAction::Record,
                Tile::Recording { session, .. } => TapAction::Stop(session.clone()),
                Tile::Saving => TapAction::Ignore,
                Tile::HasSound { record } | Tile::Playing { record } => TapAction::Play(record.clone()),
                Tile::Error { record: None, .. } => TapAction::Retry,
                Tile::Error { record: Some(_), .. } => TapAction::Ignore,
            }
        };

        match action {
            TapAction::Record => self.start_recording(slot).await,
            TapAction::Stop(session) => self.stop_recording(slot, session),
            TapAction::Play(record) => self.start_playback(slot, record).await,
            TapAction::Retry => {
                if self.lock().apply(slot, TileEvent::Retry) {
                    self.start_recording(slot).await;
                }
            }
            TapAction::Ignore => log::debug!("{slot}: tap ignored"),
        }
    }

    async fn start_recording(&self, slot: SlotIndex) {
        {
            let mut board = self.lock();
            if !matches!(board.tile(slot).tile, Tile::Empty) {
                return;
            }
            if board.capture_busy() {
                log::warn!("{slot}: another slot is recording; tap ignored");
                return;
            }
            board.set_acquiring(Some(slot));
        }

        let stream = match self.capture.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("{slot}: microphone unavailable: {e}");
                let mut board = self.lock();
                board.set_acquiring(None);
                board.apply(slot, TileEvent::CaptureFailed(e.user_message().to_owned()));
                return;
            }
        };

        let on_complete: CompletionCallback = {
            let this = self.clone();
            Box::new(move |result: Result<Recording, EncodeError>| {
                let completed_at = Utc::now();
                tokio::spawn(async move { this.finish_recording(slot, result, completed_at).await });
            })
        };
        let on_warning: WarningCallback = {
            let this = self.clone();
            Box::new(move || {
                if this.lock().apply(slot, TileEvent::Warning) {
                    this.emit(BoardEvent::RecordingWarning { slot });
                }
            })
        };

        let session = self.recorder.start(stream.as_ref(), on_complete, Some(on_warning));
        let started = {
            let mut board = self.lock();
            board.set_acquiring(None);
            board.apply(slot, TileEvent::CaptureAcquired(session.clone()))
        };
        if started {
            log::info!("{slot}: recording");
            self.emit(BoardEvent::RecordingStarted { slot });
        } else {
            // Unreachable while `acquiring` guards the slot.
            log::error!("{slot}: tile changed during microphone acquisition; stopping session");
            session.stop();
        }
    }

    fn stop_recording(&self, slot: SlotIndex, session: RecordingHandle) {
        self.lock().apply(slot, TileEvent::Stopped);
        session.stop();
    }

    async fn finish_recording(
        &self,
        slot: SlotIndex,
        result: Result<Recording, EncodeError>,
        completed_at: chrono::DateTime<Utc>,
    ) {
        // Auto-stop arrives here while the tile still shows Recording.
        self.lock().apply(slot, TileEvent::Stopped);

        let recording = match result {
            Ok(recording) => recording,
            Err(e) => {
                log::error!("{slot}: could not assemble recording: {e}");
                self.lock().apply(slot, TileEvent::PersistFailed(SAVE_FAILED.into()));
                return;
            }
        };

        let duration = recording.duration_seconds();
        let elapsed = recording.elapsed;
        let record = SlotRecord::new(recording.payload, completed_at, Some(duration));
        match self.store.save(slot, &record).await {
            Ok(()) => {
                self.playback.clear_cache(slot);
                log::info!("{slot}: saved {}s recording", elapsed.as_secs());
                self.lock().apply(slot, TileEvent::Persisted(record));
            }
            Err(e) => {
                log::error!("{slot}: saving recording failed: {e}");
                self.lock().apply(slot, TileEvent::PersistFailed(SAVE_FAILED.into()));
            }
        }
    }

    async fn start_playback(&self, slot: SlotIndex, record: SlotRecord) {
        if !self.lock().apply(slot, TileEvent::Play) {
            return;
        }

        let on_ended: EndedCallback = {
            let this = self.clone();
            Box::new(move || {
                if this.lock().apply(slot, TileEvent::PlaybackEnded) {
                    this.emit(BoardEvent::PlaybackEnded { slot });
                }
            })
        };

        match self.playback.play(slot, &record.payload, record.trim, on_ended).await {
            Ok(started) => self.emit(BoardEvent::PlaybackStarted { slot, started }),
            Err(e) => {
                log::warn!("{slot}: playback failed: {e}");
                self.lock().apply(slot, TileEvent::DecodeFailed(PLAYBACK_FAILED.into()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Auxiliary actions
    // -----------------------------------------------------------------------

    /// Removes the slot's recording.
    pub async fn delete(&self, slot: SlotIndex) -> Result<(), BoardError> {
        self.ensure_output().await;
        let _edit = self.edit_lock(slot).await;
        self.ensure_idle(slot)?;

        self.playback.stop(slot);
        self.store.delete(slot).await?;
        self.playback.clear_cache(slot);
        self.lock().apply(slot, TileEvent::Cleared);
        log::info!("{slot}: deleted");
        Ok(())
    }

    /// Deletes the recording and immediately starts a new one.
    pub async fn rerecord(&self, slot: SlotIndex) -> Result<(), BoardError> {
        self.delete(slot).await?;
        self.tap(slot).await;
        Ok(())
    }

    /// Restricts playback to the audible part of the recording.
    pub async fn trim(&self, slot: SlotIndex) -> Result<TrimOutcome, BoardError> {
        self.ensure_output().await;
        let _edit = self.edit_lock(slot).await;
        let record = self.current_record(slot)?;

        let decoded = self.playback.decoded(slot, &record.payload).await?;
        let Some(window) = find_trim_window(&decoded, self.trim_threshold) else {
            log::info!("{slot}: nothing to trim");
            return Ok(TrimOutcome::NothingToTrim);
        };

        let trimmed = apply_trim(&record, window.start_sec, window.end_sec);
        self.store.save(slot, &trimmed).await?;
        self.lock().apply(slot, TileEvent::RecordUpdated(trimmed));
        log::info!("{slot}: trimmed to {:.3}s..{:.3}s", window.start_sec, window.end_sec);
        Ok(TrimOutcome::Trimmed(window))
    }

    /// Sets or clears the label. Blank labels clear it.
    pub async fn rename(&self, slot: SlotIndex, label: Option<String>) -> Result<(), BoardError> {
        self.ensure_output().await;
        let _edit = self.edit_lock(slot).await;
        let record = self.current_record(slot)?;
        let label = label.map(|l| l.trim().to_owned()).filter(|l| !l.is_empty());
        self.update_record(slot, SlotRecord { label, ..record }).await
    }

    /// Sets a `#rgb`/`#rrggbb` colour, or `None` for the palette default.
    pub async fn recolor(&self, slot: SlotIndex, color: Option<String>) -> Result<(), BoardError> {
        self.ensure_output().await;
        if let Some(c) = color.as_deref() {
            if !is_valid_color(c) {
                return Err(BoardError::InvalidColor(c.to_owned()));
            }
        }
        let _edit = self.edit_lock(slot).await;
        let record = self.current_record(slot)?;
        self.update_record(slot, SlotRecord { color, ..record }).await
    }

    /// Writes the payload to `dir/sound-<n>.<ext>` and returns the path.
    pub async fn export(&self, slot: SlotIndex, dir: &Path) -> Result<PathBuf, BoardError> {
        self.ensure_output().await;
        let record = self.current_record(slot)?;

        let name = format!("sound-{}.{}", slot.number(), file_extension(record.payload.media_type()));
        let path = dir.join(name);
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, record.payload.bytes()).await?;
        log::info!("{slot}: exported to {}", path.display());
        Ok(path)
    }

    /// Replaces the slot's content with an audio file, validated by decoding.
    pub async fn import(&self, slot: SlotIndex, path: &Path) -> Result<(), BoardError> {
        self.ensure_output().await;
        let _edit = self.edit_lock(slot).await;
        self.ensure_idle(slot)?;

        let bytes = tokio::fs::read(path).await?;
        let media_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(FALLBACK_MEDIA_TYPE, media_type_for_extension);
        let payload = Payload::new(bytes, media_type);

        let decoded = self.playback.decode(&payload).await?;
        let duration = decoded.duration().round() as u32;
        let record = SlotRecord::new(payload, Utc::now(), Some(duration));

        self.playback.stop(slot);
        self.store.save(slot, &record).await?;
        self.playback.clear_cache(slot);
        {
            let mut board = self.lock();
            board.apply(slot, TileEvent::Cleared);
            board.apply(slot, TileEvent::Loaded(record));
        }
        log::info!("{slot}: imported {} ({duration}s)", path.display());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        lock(&self.board)
    }

    fn emit(&self, event: BoardEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn notice(&self, slot: SlotIndex, message: String) {
        self.emit(BoardEvent::Notice { slot, message });
    }

    fn report<T>(&self, slot: SlotIndex, success: &str, result: Result<T, BoardError>) {
        match result {
            Ok(_) => self.notice(slot, success.to_owned()),
            Err(e) => self.report_err(slot, e),
        }
    }

    fn report_err(&self, slot: SlotIndex, e: BoardError) {
        log::warn!("{slot}: {e}");
        self.notice(slot, e.to_string());
    }

    /// Serialises read-save-publish sequences on one slot.
    async fn edit_lock(&self, slot: SlotIndex) -> AsyncMutexGuard<'_, ()> {
        self.edits[slot.get()].lock().await
    }

    /// Resumes the output context; failures surface later, on play.
    async fn ensure_output(&self) {
        if let Err(e) = self.playback.ensure_running().await {
            log::warn!("audio output not running: {e}");
        }
    }

    fn ensure_idle(&self, slot: SlotIndex) -> Result<(), BoardError> {
        if self.lock().is_busy(slot) {
            return Err(BoardError::Busy(slot));
        }
        Ok(())
    }

    fn current_record(&self, slot: SlotIndex) -> Result<SlotRecord, BoardError> {
        let board = self.lock();
        if board.is_busy(slot) {
            return Err(BoardError::Busy(slot));
        }
        board.tile(slot).tile.record().cloned().ok_or(BoardError::NoRecord(slot))
    }

    async fn update_record(&self, slot: SlotIndex, record: SlotRecord) -> Result<(), BoardError> {
        self.store.save(slot, &record).await?;
        self.lock().apply(slot, TileEvent::RecordUpdated(record));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
