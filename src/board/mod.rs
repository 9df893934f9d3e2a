//! The 3×3 board: per-tile state machine and the orchestrator that drives it.
//!
//! # Architecture
//!
//! ```text
//! UI (egui) ── BoardCommand (mpsc) ──► Soundboard::run()  ← async tokio task
//!                                           │
//!                                           ├─ CaptureManager / Recorder
//!                                           ├─ PlaybackManager
//!                                           └─ SlotStore
//!
//! SharedBoard (Arc<Mutex<BoardState>>) ←── read by egui update() each frame
//! BoardEvent (unbounded mpsc)          ──► UI timers, toasts
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use soundboard::audio::{CaptureConstraints, CaptureManager, CpalMicrophone, PlaybackManager, Recorder, RecordingLimits, WavEncoder};
//! use soundboard::audio::format::PREFERRED_MEDIA_TYPES;
//! use soundboard::board::{new_shared_board, BoardCommand, Soundboard};
//! use soundboard::storage::{MemorySlotStore, SlotIndex};
//!
//! # fn make_playback() -> PlaybackManager { unimplemented!() }
//! #[tokio::main]
//! async fn main() {
//!     let board = Soundboard::new(
//!         new_shared_board(),
//!         Arc::new(CaptureManager::new(Arc::new(CpalMicrophone::new()), CaptureConstraints::default())),
//!         Arc::new(Recorder::new(Arc::new(WavEncoder), PREFERRED_MEDIA_TYPES, RecordingLimits::default())),
//!         Arc::new(make_playback()),
//!         Arc::new(MemorySlotStore::new()),
//!     );
//!     board.load().await;
//!
//!     let (tx, rx) = mpsc::channel(32);
//!     tokio::spawn(board.run(rx));
//!     tx.send(BoardCommand::Tap(SlotIndex::new(0).unwrap())).await.unwrap();
//! }
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{BoardCommand, BoardError, BoardEvent, Soundboard, TrimOutcome};
pub use state::{new_shared_board, BoardState, SharedBoard, Tile, TileData, TileEvent, TileKind};
