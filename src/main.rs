//! Application entry point — nine-slot soundboard.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the capture, recording, playback and storage layers from config.
//! 5. Rehydrate the board from the slot store.
//! 6. Spawn the [`Soundboard`] command loop on the runtime.
//! 7. Run [`eframe::run_native`] — blocks the main thread until the window
//!    is closed.
//!
//! The microphone and the output device are opened lazily, on the first tap
//! that needs them.

use std::sync::Arc;

use anyhow::Context as _;
use eframe::egui;
use tokio::sync::mpsc;

use soundboard::{
    app::SoundboardApp,
    audio::{
        player::ContextFactory, CaptureManager, CpalMicrophone, CpalOutput, OutputContext, PlaybackError,
        PlaybackManager, Recorder, WavEncoder,
    },
    board::{new_shared_board, BoardCommand, BoardEvent, Soundboard},
    config::{AppConfig, AppPaths},
    storage::{FsSlotStore, SlotStore},
};

// ---------------------------------------------------------------------------
// Native options builder
// ---------------------------------------------------------------------------

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let (width, height) = config.ui.window_size;
    let mut vp = egui::ViewportBuilder::default()
        .with_title("Soundboard")
        .with_inner_size([width, height])
        .with_min_inner_size([240.0, 260.0])
        .with_drag_and_drop(true);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("soundboard starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let paths = AppPaths::new();

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Audio + storage layers
    let capture = Arc::new(CaptureManager::new(
        Arc::new(CpalMicrophone::new()),
        config.capture.constraints(),
    ));
    let recorder = Arc::new(Recorder::new(
        Arc::new(WavEncoder),
        &config.recording.preferred_media_types,
        config.recording.limits(),
    ));
    log::info!("recording as {}", recorder.media_type());

    let factory: ContextFactory = Arc::new(|| -> Result<Arc<dyn OutputContext>, PlaybackError> {
        Ok(Arc::new(CpalOutput::open()?))
    });
    let playback = Arc::new(PlaybackManager::new(factory));

    let slots_dir = config.storage.resolve(&paths);
    log::info!("slot storage: {}", slots_dir.display());
    let store: Arc<dyn SlotStore> = Arc::new(FsSlotStore::new(slots_dir));

    let (events_tx, events_rx) = mpsc::unbounded_channel::<BoardEvent>();
    let (command_tx, command_rx) = mpsc::channel::<BoardCommand>(32);

    let board = Soundboard::new(new_shared_board(), capture, recorder, playback, store)
        .with_events(events_tx)
        .with_trim_threshold(config.trim.silence_threshold)
        .with_export_dir(config.export.resolve(&paths));
    let shared = board.state();

    // 5. Rehydrate; unreadable slots come up as error tiles
    rt.block_on(board.load());

    // 6. Command loop
    rt.spawn(board.run(command_rx));

    // 7. Build the egui app and run it (blocks until the window is closed)
    let app = SoundboardApp::new(shared, command_tx, events_rx, config.clone());
    let options = native_options(&config);
    eframe::run_native("Soundboard", options, Box::new(move |_cc| Ok(Box::new(app))))
        .map_err(|e| anyhow::anyhow!("window failed: {e}"))?;

    log::info!("soundboard shut down");
    Ok(())
}
