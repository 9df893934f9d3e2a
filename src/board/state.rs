//! Per-tile state machine and shared board state.
//!
//! [`Tile`] is the state of one slot; [`Tile::on`] is the pure transition
//! function that the orchestrator drives with [`TileEvent`]s.  Events that are
//! not valid in the current state yield `None` and leave the tile untouched.
//!
//! [`BoardState`] holds all nine tiles plus the process-wide "microphone is
//! being acquired" marker.  [`SharedBoard`] is `Arc<Mutex<BoardState>>`: the
//! orchestrator mutates it, the egui loop reads it every frame.

use std::sync::{Arc, Mutex};

use crate::audio::recorder::RecordingHandle;
use crate::storage::record::{default_color, SlotIndex, SlotRecord, SLOT_COUNT};

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// State of a single slot.
///
/// ```text
/// Empty ──tap──▶ Recording ──tap / 30 s──▶ Saving ──saved──▶ HasSound
///   ▲  ╲                                      ╲
///   │   ╲ mic denied                           ╲ save failed
///   │    ▼                                      ▼
///   └── Error(no record) ◀─────────────────── Error(no record)
///
/// HasSound ──tap──▶ Playing ──ended──▶ HasSound
/// Playing  ──tap──▶ Playing (restart)
/// HasSound / Playing ──decode failed──▶ Error(record kept)
/// ```
#[derive(Debug, Clone)]
pub enum Tile {
    Empty,
    Recording { session: RecordingHandle, warning: bool },
    Saving,
    HasSound { record: SlotRecord },
    Playing { record: SlotRecord },
    Error { message: String, record: Option<SlotRecord> },
}

/// Inputs to [`Tile::on`].
#[derive(Debug, Clone)]
pub enum TileEvent {
    /// Microphone acquired and the session is running.
    CaptureAcquired(RecordingHandle),
    /// Microphone could not be acquired; carries the user-facing message.
    CaptureFailed(String),
    /// The session passed its warning mark.
    Warning,
    /// The session stopped (manually or by the time limit).
    Stopped,
    Persisted(SlotRecord),
    PersistFailed(String),
    /// Record found in the store at start-up or written by an import.
    Loaded(SlotRecord),
    /// The store holds something for this slot that could not be read.
    LoadFailed(String),
    Play,
    PlaybackEnded,
    DecodeFailed(String),
    Retry,
    /// Label, colour, trim or payload changed.
    RecordUpdated(SlotRecord),
    Cleared,
}

/// Payload-free discriminant of [`Tile`], handy for the UI and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Empty,
    Recording,
    Saving,
    HasSound,
    Playing,
    Error,
}

impl TileKind {
    /// `true` while the slot's content is being produced.
    ///
    /// ```
    /// use soundboard::board::TileKind;
    ///
    /// assert!(TileKind::Recording.is_busy());
    /// assert!(TileKind::Saving.is_busy());
    /// assert!(!TileKind::Playing.is_busy());
    /// ```
    pub fn is_busy(self) -> bool {
        matches!(self, TileKind::Recording | TileKind::Saving)
    }

    pub fn label(self) -> &'static str {
        match self {
            TileKind::Empty => "Empty",
            TileKind::Recording => "Recording",
            TileKind::Saving => "Saving",
            TileKind::HasSound => "Ready",
            TileKind::Playing => "Playing",
            TileKind::Error => "Error",
        }
    }
}

impl Default for Tile {
    fn default() -> Self {
        Tile::Empty
    }
}

impl Tile {
    pub fn kind(&self) -> TileKind {
        match self {
            Tile::Empty => TileKind::Empty,
            Tile::Recording { .. } => TileKind::Recording,
            Tile::Saving => TileKind::Saving,
            Tile::HasSound { .. } => TileKind::HasSound,
            Tile::Playing { .. } => TileKind::Playing,
            Tile::Error { .. } => TileKind::Error,
        }
    }

    /// The record this tile holds, if any.
    pub fn record(&self) -> Option<&SlotRecord> {
        match self {
            Tile::HasSound { record } | Tile::Playing { record } => Some(record),
            Tile::Error { record, .. } => record.as_ref(),
            Tile::Empty | Tile::Recording { .. } | Tile::Saving => None,
        }
    }

    /// Next state after `event`, or `None` if the event does not apply.
    pub fn on(&self, event: TileEvent) -> Option<Tile> {
        use TileEvent as E;

        match self {
            Tile::Empty => match event {
                E::CaptureAcquired(session) => Some(Tile::Recording {
                    session,
                    warning: false,
                }),
                E::CaptureFailed(message) => Some(Tile::Error { message, record: None }),
                E::Loaded(record) => Some(Tile::HasSound { record }),
                E::LoadFailed(message) => Some(Tile::Error { message, record: None }),
                E::Cleared => Some(Tile::Empty),
                _ => None,
            },
            Tile::Recording { session, .. } => match event {
                E::Warning => Some(Tile::Recording {
                    session: session.clone(),
                    warning: true,
                }),
                E::Stopped => Some(Tile::Saving),
                _ => None,
            },
            Tile::Saving => match event {
                E::Persisted(record) => Some(Tile::HasSound { record }),
                E::PersistFailed(message) => Some(Tile::Error { message, record: None }),
                _ => None,
            },
            Tile::HasSound { record } => match event {
                E::Play => Some(Tile::Playing { record: record.clone() }),
                E::DecodeFailed(message) => Some(Tile::Error {
                    message,
                    record: Some(record.clone()),
                }),
                E::RecordUpdated(record) => Some(Tile::HasSound { record }),
                E::Cleared => Some(Tile::Empty),
                _ => None,
            },
            Tile::Playing { record } => match event {
                E::Play => Some(Tile::Playing { record: record.clone() }),
                E::PlaybackEnded => Some(Tile::HasSound { record: record.clone() }),
                E::DecodeFailed(message) => Some(Tile::Error {
                    message,
                    record: Some(record.clone()),
                }),
                E::RecordUpdated(record) => Some(Tile::Playing { record }),
                E::Cleared => Some(Tile::Empty),
                _ => None,
            },
            Tile::Error { message, record } => match (event, record) {
                (E::Retry, None) => Some(Tile::Empty),
                (E::RecordUpdated(updated), Some(_)) => Some(Tile::Error {
                    message: message.clone(),
                    record: Some(updated),
                }),
                (E::Cleared, _) => Some(Tile::Empty),
                _ => None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TileData
// ---------------------------------------------------------------------------

/// A tile plus the label/colour mirrored from its record.
#[derive(Debug, Clone, Default)]
pub struct TileData {
    pub tile: Tile,
    pub label: Option<String>,
    pub color: Option<String>,
}

impl TileData {
    pub fn kind(&self) -> TileKind {
        self.tile.kind()
    }

    /// Applies `event`; returns whether the tile changed.
    pub fn apply(&mut self, event: TileEvent) -> bool {
        let Some(next) = self.tile.on(event) else {
            return false;
        };
        if let Some(record) = next.record() {
            self.label = record.label.clone();
            self.color = record.color.clone();
        } else if matches!(next, Tile::Empty) {
            self.label = None;
            self.color = None;
        }
        self.tile = next;
        true
    }
}

// ---------------------------------------------------------------------------
// BoardState
// ---------------------------------------------------------------------------

/// All nine tiles.
#[derive(Debug, Default)]
pub struct BoardState {
    tiles: [TileData; SLOT_COUNT],
    /// Slot currently waiting for the microphone.
    acquiring: Option<SlotIndex>,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile(&self, slot: SlotIndex) -> &TileData {
        &self.tiles[slot.get()]
    }

    pub fn tiles(&self) -> impl Iterator<Item = (SlotIndex, &TileData)> {
        SlotIndex::all().zip(self.tiles.iter())
    }

    /// Applies `event` to `slot`, logging the transition. Returns whether the
    /// tile changed.
    pub fn apply(&mut self, slot: SlotIndex, event: TileEvent) -> bool {
        let tile = &mut self.tiles[slot.get()];
        let before = tile.kind();
        let event_name = format!("{event:?}");
        let changed = tile.apply(event);
        if changed {
            log::debug!("{slot}: {} -> {}", before.label(), tile.kind().label());
        } else {
            log::debug!("{slot}: ignored {} in {}", short_name(&event_name), before.label());
        }
        changed
    }

    /// The slot with a running recording session, if any.
    pub fn recording_slot(&self) -> Option<SlotIndex> {
        self.tiles()
            .find(|(_, t)| t.kind() == TileKind::Recording)
            .map(|(slot, _)| slot)
    }

    pub fn acquiring(&self) -> Option<SlotIndex> {
        self.acquiring
    }

    pub fn set_acquiring(&mut self, slot: Option<SlotIndex>) {
        self.acquiring = slot;
    }

    /// `true` if a tap on an empty slot must not start a new session.
    pub fn capture_busy(&self) -> bool {
        self.acquiring.is_some() || self.recording_slot().is_some()
    }

    /// `true` while `slot` is acquiring, recording or saving.
    pub fn is_busy(&self, slot: SlotIndex) -> bool {
        self.acquiring == Some(slot) || self.tile(slot).kind().is_busy()
    }

    /// Colour to draw `slot` with: its own, or the palette default.
    pub fn color_of(&self, slot: SlotIndex) -> &str {
        self.tile(slot)
            .color
            .as_deref()
            .unwrap_or_else(|| default_color(slot))
    }
}

fn short_name(debug: &str) -> &str {
    debug.split(['(', ' ', '{']).next().unwrap_or(debug)
}

// ---------------------------------------------------------------------------
// SharedBoard
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`BoardState`]. Never hold the lock across `.await`.
pub type SharedBoard = Arc<Mutex<BoardState>>;

pub fn new_shared_board() -> SharedBoard {
    Arc::new(Mutex::new(BoardState::new()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{AudioChunk, CaptureStream, CaptureTap, ChunkRouter};
    use crate::audio::format::{Payload, WavEncoder};
    use crate::audio::recorder::{Recorder, RecordingLimits};
    use chrono::Utc;
    use tokio::sync::mpsc::UnboundedSender;

    struct Silent(ChunkRouter);

    impl CaptureStream for Silent {
        fn is_live(&self) -> bool {
            true
        }
        fn tap(&self, sink: UnboundedSender<AudioChunk>) -> CaptureTap {
            self.0.attach(sink)
        }
    }

    fn handle() -> RecordingHandle {
        let recorder = Recorder::new(Arc::new(WavEncoder), &["audio/wav"], RecordingLimits::default());
        recorder.start(&Silent(ChunkRouter::default()), Box::new(|_| {}), None)
    }

    fn record(label: &str) -> SlotRecord {
        let mut r = SlotRecord::new(Payload::new(vec![0u8; 4], "audio/wav"), Utc::now(), Some(2));
        r.label = Some(label.into());
        r
    }

    fn error(with_record: bool) -> Tile {
        Tile::Error {
            message: "boom".into(),
            record: with_record.then(|| record("kept")),
        }
    }

    fn slot(i: usize) -> SlotIndex {
        SlotIndex::new(i).unwrap()
    }

    /// One instance of every event; the recording handle is shared.
    fn all_events(session: &RecordingHandle) -> Vec<TileEvent> {
        vec![
            TileEvent::CaptureAcquired(session.clone()),
            TileEvent::CaptureFailed("denied".into()),
            TileEvent::Warning,
            TileEvent::Stopped,
            TileEvent::Persisted(record("new")),
            TileEvent::PersistFailed("disk".into()),
            TileEvent::Loaded(record("loaded")),
            TileEvent::LoadFailed("corrupt".into()),
            TileEvent::Play,
            TileEvent::PlaybackEnded,
            TileEvent::DecodeFailed("bad".into()),
            TileEvent::Retry,
            TileEvent::RecordUpdated(record("updated")),
            TileEvent::Cleared,
        ]
    }

    // ---- happy paths ---

    #[tokio::test]
    async fn empty_to_recording_to_saving_to_has_sound() {
        let session = handle();
        let mut tile = TileData::default();

        assert!(tile.apply(TileEvent::CaptureAcquired(session)));
        assert!(matches!(tile.tile, Tile::Recording { warning: false, .. }));

        assert!(tile.apply(TileEvent::Warning));
        assert!(matches!(tile.tile, Tile::Recording { warning: true, .. }));

        assert!(tile.apply(TileEvent::Stopped));
        assert_eq!(tile.kind(), TileKind::Saving);

        assert!(tile.apply(TileEvent::Persisted(record("fresh"))));
        assert_eq!(tile.kind(), TileKind::HasSound);
        assert_eq!(tile.label.as_deref(), Some("fresh"));
    }

    #[test]
    fn play_restart_and_end() {
        let has = Tile::HasSound { record: record("a") };
        let playing = has.on(TileEvent::Play).unwrap();
        assert_eq!(playing.kind(), TileKind::Playing);
        assert_eq!(playing.on(TileEvent::Play).unwrap().kind(), TileKind::Playing);
        assert_eq!(playing.on(TileEvent::PlaybackEnded).unwrap().kind(), TileKind::HasSound);
    }

    #[test]
    fn decode_failure_keeps_record() {
        for tile in [Tile::HasSound { record: record("a") }, Tile::Playing { record: record("a") }] {
            let next = tile.on(TileEvent::DecodeFailed("bad".into())).unwrap();
            assert_eq!(next.kind(), TileKind::Error);
            assert_eq!(next.record().and_then(|r| r.label.as_deref()), Some("a"));
        }
    }

    #[test]
    fn capture_and_persist_failures_have_no_record() {
        let denied = Tile::Empty.on(TileEvent::CaptureFailed("denied".into())).unwrap();
        assert!(matches!(denied, Tile::Error { record: None, .. }));

        let failed = Tile::Saving.on(TileEvent::PersistFailed("disk".into())).unwrap();
        assert!(matches!(failed, Tile::Error { record: None, .. }));

        let unreadable = Tile::Empty.on(TileEvent::LoadFailed("corrupt".into())).unwrap();
        assert!(matches!(unreadable, Tile::Error { record: None, .. }));
    }

    #[test]
    fn retry_only_without_record() {
        assert_eq!(error(false).on(TileEvent::Retry).unwrap().kind(), TileKind::Empty);
        assert!(error(true).on(TileEvent::Retry).is_none());
    }

    #[test]
    fn record_update_keeps_state() {
        let updated = Tile::Playing { record: record("a") }
            .on(TileEvent::RecordUpdated(record("b")))
            .unwrap();
        assert_eq!(updated.kind(), TileKind::Playing);
        assert_eq!(updated.record().unwrap().label.as_deref(), Some("b"));

        let err = error(true).on(TileEvent::RecordUpdated(record("c"))).unwrap();
        assert!(matches!(&err, Tile::Error { message, .. } if message == "boom"));
        assert_eq!(err.record().unwrap().label.as_deref(), Some("c"));
    }

    // ---- totality ---

    #[tokio::test]
    async fn every_state_event_pair_is_handled() {
        let session = handle();
        let states = vec![
            Tile::Empty,
            Tile::Recording {
                session: session.clone(),
                warning: false,
            },
            Tile::Saving,
            Tile::HasSound { record: record("a") },
            Tile::Playing { record: record("a") },
            error(false),
            error(true),
        ];

        // (state, number of events that must be accepted)
        let expected_accepts = [5, 2, 2, 4, 5, 2, 2];
        for (state, expected) in states.iter().zip(expected_accepts) {
            let accepted = all_events(&session)
                .into_iter()
                .filter(|e| state.on(e.clone()).is_some())
                .count();
            assert_eq!(accepted, expected, "state {:?}", state.kind());
        }
    }

    #[tokio::test]
    async fn saving_ignores_taps_and_recording_cannot_be_cleared() {
        let session = handle();
        assert!(Tile::Saving.on(TileEvent::Play).is_none());
        assert!(Tile::Saving.on(TileEvent::Cleared).is_none());
        let recording = Tile::Recording { session, warning: false };
        assert!(recording.on(TileEvent::Cleared).is_none());
    }

    // ---- mirrors / board ---

    #[test]
    fn clearing_resets_mirrors() {
        let mut tile = TileData::default();
        let mut r = record("x");
        r.color = Some("#fff".into());
        tile.apply(TileEvent::Loaded(r));
        assert_eq!(tile.color.as_deref(), Some("#fff"));

        tile.apply(TileEvent::Cleared);
        assert_eq!(tile.label, None);
        assert_eq!(tile.color, None);
    }

    #[tokio::test]
    async fn board_tracks_the_recording_slot() {
        let mut board = BoardState::new();
        assert!(!board.capture_busy());

        board.apply(slot(3), TileEvent::CaptureAcquired(handle()));
        assert_eq!(board.recording_slot(), Some(slot(3)));
        assert!(board.capture_busy());
        assert!(board.is_busy(slot(3)));
        assert!(!board.is_busy(slot(4)));
    }

    #[test]
    fn acquiring_marks_slot_busy() {
        let mut board = BoardState::new();
        board.set_acquiring(Some(slot(1)));
        assert!(board.capture_busy());
        assert!(board.is_busy(slot(1)));
    }

    #[test]
    fn colour_falls_back_to_palette() {
        let mut board = BoardState::new();
        assert_eq!(board.color_of(slot(0)), "#FF6B6B");
        let mut r = record("a");
        r.color = Some("#000".into());
        board.apply(slot(0), TileEvent::Loaded(r));
        assert_eq!(board.color_of(slot(0)), "#000");
    }

    #[test]
    fn busy_kinds() {
        assert!(TileKind::Recording.is_busy());
        assert!(!TileKind::HasSound.is_busy());
        assert!(!TileKind::Error.is_busy());
    }
}
