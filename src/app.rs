//! Soundboard window — egui/eframe application.
//!
//! # Architecture
//!
//! [`SoundboardApp`] is the top-level [`eframe::App`].  It reads the
//! [`SharedBoard`] every frame and talks to the orchestrator through two
//! channel endpoints:
//!
//! * `command_tx` — sends [`BoardCommand`] to [`Soundboard::run`](crate::board::Soundboard::run).
//! * `events_rx`  — receives [`BoardEvent`] (playback timing, notices).
//!
//! # Tile visuals
//!
//! | Tile | Visual |
//! |------|--------|
//! | `Empty` | dimmed slot colour, "Tap to record" |
//! | `Recording` | red with elapsed seconds, amber after the warning |
//! | `Saving` | grey, "Saving…" |
//! | `HasSound` | slot colour, label and duration |
//! | `Playing` | slot colour with a progress bar |
//! | `Error` | orange with the message |
//!
//! Keys `1`–`9` tap the matching slot.  Right-click a tile for delete,
//! re-record, trim, rename/colour, export and import.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use eframe::egui;
use tokio::sync::mpsc;

use crate::board::{BoardCommand, BoardEvent, SharedBoard, Tile, TileData, TileKind};
use crate::config::AppConfig;
use crate::storage::{SlotIndex, SLOT_COUNT};
use crate::sync::lock;

const NOTICE_TIMEOUT: Duration = Duration::from_secs(4);

const SLOT_KEYS: [egui::Key; SLOT_COUNT] = [
    egui::Key::Num1,
    egui::Key::Num2,
    egui::Key::Num3,
    egui::Key::Num4,
    egui::Key::Num5,
    egui::Key::Num6,
    egui::Key::Num7,
    egui::Key::Num8,
    egui::Key::Num9,
];

// ---------------------------------------------------------------------------
// UI-only state
// ---------------------------------------------------------------------------

/// Local clock for a playing tile, anchored when `PlaybackStarted` arrives.
#[derive(Debug, Clone, Copy)]
struct PlaybackClock {
    since: Instant,
    duration: f64,
}

impl PlaybackClock {
    fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (self.since.elapsed().as_secs_f64() / self.duration).clamp(0.0, 1.0) as f32
    }
}

/// Open rename/colour dialog.
#[derive(Debug, Clone)]
struct TileEditor {
    slot: SlotIndex,
    label: String,
    color: String,
}

// ---------------------------------------------------------------------------
// SoundboardApp
// ---------------------------------------------------------------------------

pub struct SoundboardApp {
    board: SharedBoard,
    command_tx: mpsc::Sender<BoardCommand>,
    events_rx: mpsc::UnboundedReceiver<BoardEvent>,
    pub config: AppConfig,

    playback: [Option<PlaybackClock>; SLOT_COUNT],
    notice: Option<(String, Instant)>,
    editor: Option<TileEditor>,
    /// Slot that receives the next file dropped onto the window.
    import_target: Option<SlotIndex>,
}

impl SoundboardApp {
    pub fn new(
        board: SharedBoard,
        command_tx: mpsc::Sender<BoardCommand>,
        events_rx: mpsc::UnboundedReceiver<BoardEvent>,
        config: AppConfig,
    ) -> Self {
        Self {
            board,
            command_tx,
            events_rx,
            config,
            playback: [None; SLOT_COUNT],
            notice: None,
            editor: None,
            import_target: None,
        }
    }

    fn send(&mut self, command: BoardCommand) {
        if let Err(e) = self.command_tx.try_send(command) {
            log::warn!("dropping UI command: {e}");
            self.notice = Some(("Busy, try again.".into(), Instant::now()));
        }
    }

    // ── Channel polling ──────────────────────────────────────────────────

    /// Drain all pending board events (non-blocking).
    fn poll_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                BoardEvent::PlaybackStarted { slot, started } => {
                    self.playback[slot.get()] = Some(PlaybackClock {
                        since: Instant::now(),
                        duration: started.duration,
                    });
                }
                BoardEvent::PlaybackEnded { slot } => self.playback[slot.get()] = None,
                BoardEvent::Notice { slot, message } => {
                    self.notice = Some((format!("Sound {}: {message}", slot.number()), Instant::now()));
                }
                BoardEvent::RecordingStarted { .. } | BoardEvent::RecordingWarning { .. } => {}
            }
        }

        if self.notice.as_ref().is_some_and(|(_, at)| at.elapsed() >= NOTICE_TIMEOUT) {
            self.notice = None;
        }
    }

    fn poll_input(&mut self, ctx: &egui::Context) {
        if self.editor.is_none() {
            let pressed: Vec<SlotIndex> = ctx.input(|i| {
                SlotIndex::all()
                    .zip(SLOT_KEYS)
                    .filter(|(_, key)| i.key_pressed(*key))
                    .map(|(slot, _)| slot)
                    .collect()
            });
            for slot in pressed {
                self.send(BoardCommand::Tap(slot));
            }
        }

        let dropped: Option<PathBuf> = ctx.input(|i| i.raw.dropped_files.iter().find_map(|f| f.path.clone()));
        if let Some(path) = dropped {
            match self.import_target.take() {
                Some(slot) => self.send(BoardCommand::Import(slot, path)),
                None => log::debug!("ignoring dropped file {}", path.display()),
            }
        }
    }

    // ── Renderers ────────────────────────────────────────────────────────

    fn draw_grid(&mut self, ui: &mut egui::Ui) {
        let tiles: Vec<(SlotIndex, TileData, String)> = {
            let board = lock(&self.board);
            board
                .tiles()
                .map(|(slot, data)| (slot, data.clone(), board.color_of(slot).to_owned()))
                .collect()
        };

        let spacing = 8.0;
        let side = ((ui.available_width() - 2.0 * spacing) / 3.0).max(60.0);
        let mut commands = Vec::new();

        egui::Grid::new("tiles")
            .spacing([spacing, spacing])
            .show(ui, |ui| {
                for (slot, data, color) in &tiles {
                    self.draw_tile(ui, *slot, data, color, side, &mut commands);
                    if slot.number() % 3 == 0 {
                        ui.end_row();
                    }
                }
            });

        for command in commands {
            self.send(command);
        }
    }

    fn draw_tile(
        &mut self,
        ui: &mut egui::Ui,
        slot: SlotIndex,
        data: &TileData,
        color: &str,
        side: f32,
        commands: &mut Vec<BoardCommand>,
    ) {
        let fill = tile_fill(data, color);
        let text = egui::RichText::new(tile_caption(slot, data))
            .color(text_color(fill))
            .size(13.0);

        let response = ui.add(
            egui::Button::new(text)
                .fill(fill)
                .corner_radius(egui::CornerRadius::same(8))
                .min_size(egui::vec2(side, side)),
        );

        if data.kind() == TileKind::Playing {
            if let Some(clock) = self.playback[slot.get()] {
                let bar = egui::Rect::from_min_size(
                    response.rect.left_bottom() - egui::vec2(0.0, 6.0),
                    egui::vec2(response.rect.width() * clock.progress(), 4.0),
                );
                ui.painter().rect_filled(bar, 2.0, text_color(fill));
            }
        }

        if response.clicked() {
            commands.push(BoardCommand::Tap(slot));
        }

        response.context_menu(|ui| {
            let has_record = data.tile.record().is_some();
            let busy = data.kind().is_busy();

            if ui.add_enabled(has_record && !busy, egui::Button::new("Delete")).clicked() {
                commands.push(BoardCommand::Delete(slot));
                ui.close_menu();
            }
            if ui.add_enabled(has_record && !busy, egui::Button::new("Re-record")).clicked() {
                commands.push(BoardCommand::Rerecord(slot));
                ui.close_menu();
            }
            if ui.add_enabled(has_record, egui::Button::new("Trim silence")).clicked() {
                commands.push(BoardCommand::Trim(slot));
                ui.close_menu();
            }
            if ui.add_enabled(has_record, egui::Button::new("Rename / colour…")).clicked() {
                self.editor = Some(TileEditor {
                    slot,
                    label: data.label.clone().unwrap_or_default(),
                    color: data.color.clone().unwrap_or_default(),
                });
                ui.close_menu();
            }
            if ui.add_enabled(has_record, egui::Button::new("Export")).clicked() {
                commands.push(BoardCommand::Export(slot));
                ui.close_menu();
            }
            if ui.add_enabled(!busy, egui::Button::new("Import…")).clicked() {
                self.import_target = Some(slot);
                self.notice = Some((
                    format!("Drop an audio file onto the window for sound {}.", slot.number()),
                    Instant::now(),
                ));
                ui.close_menu();
            }
        });
    }

    fn draw_editor(&mut self, ctx: &egui::Context) {
        let Some(editor) = self.editor.as_mut() else {
            return;
        };

        let mut save = false;
        let mut cancel = false;
        egui::Window::new(format!("Sound {}", editor.slot.number()))
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Label");
                    ui.text_edit_singleline(&mut editor.label);
                });
                ui.horizontal(|ui| {
                    ui.label("Colour");
                    ui.add(egui::TextEdit::singleline(&mut editor.color).hint_text("#rrggbb"));
                });
                ui.horizontal(|ui| {
                    save = ui.button("Save").clicked();
                    cancel = ui.button("Cancel").clicked();
                });
            });

        if cancel {
            self.editor = None;
        } else if save {
            if let Some(editor) = self.editor.take() {
                let color = Some(editor.color.trim().to_owned()).filter(|c| !c.is_empty());
                self.send(BoardCommand::Rename(editor.slot, Some(editor.label)));
                self.send(BoardCommand::Recolor(editor.slot, color));
            }
        }
    }

    fn draw_notice(&self, ui: &mut egui::Ui) {
        let text = match (&self.notice, self.import_target) {
            (Some((message, _)), _) => message.clone(),
            (None, Some(slot)) => format!("Waiting for a file for sound {}…", slot.number()),
            (None, None) => "Tap a tile or press 1–9.".into(),
        };
        ui.label(
            egui::RichText::new(text)
                .color(egui::Color32::from_rgb(160, 160, 160))
                .size(11.0),
        );
    }

    fn animating(&self) -> bool {
        let board = lock(&self.board);
        let busy = board
            .tiles()
            .any(|(_, t)| matches!(t.kind(), TileKind::Recording | TileKind::Saving | TileKind::Playing));
        busy
    }
}

// ---------------------------------------------------------------------------
// Tile rendering helpers
// ---------------------------------------------------------------------------

/// Multi-line tile text for the current state.
fn tile_caption(slot: SlotIndex, data: &TileData) -> String {
    let name = data.label.clone().unwrap_or_else(|| format!("Sound {}", slot.number()));
    match &data.tile {
        Tile::Empty => format!("{}\nTap to record", slot.number()),
        Tile::Recording { session, warning } => {
            let secs = session.elapsed().as_secs();
            if *warning {
                format!("● {secs}s\nAlmost full")
            } else {
                format!("● {secs}s\nTap to stop")
            }
        }
        Tile::Saving => format!("{}\nSaving…", slot.number()),
        Tile::HasSound { record } | Tile::Playing { record } => match record.duration_seconds {
            Some(secs) => format!("{name}\n{secs}s"),
            None => name,
        },
        Tile::Error { message, .. } => format!("{name}\n{message}"),
    }
}

fn tile_fill(data: &TileData, color: &str) -> egui::Color32 {
    let base = parse_hex_color(color).unwrap_or(egui::Color32::from_rgb(90, 90, 90));
    match &data.tile {
        Tile::Empty => base.gamma_multiply(0.35),
        Tile::Recording { warning: false, .. } => egui::Color32::from_rgb(220, 50, 50),
        Tile::Recording { warning: true, .. } => egui::Color32::from_rgb(240, 150, 30),
        Tile::Saving => egui::Color32::from_rgb(110, 110, 110),
        Tile::HasSound { .. } | Tile::Playing { .. } => base,
        Tile::Error { .. } => egui::Color32::from_rgb(255, 136, 68),
    }
}

/// Black or white, whichever reads better on `fill`.
fn text_color(fill: egui::Color32) -> egui::Color32 {
    let luma = 0.299 * fill.r() as f32 + 0.587 * fill.g() as f32 + 0.114 * fill.b() as f32;
    if luma > 150.0 {
        egui::Color32::BLACK
    } else {
        egui::Color32::WHITE
    }
}

/// Parses `#rgb` or `#rrggbb`.
fn parse_hex_color(color: &str) -> Option<egui::Color32> {
    let hex = color.strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = hex.chars().map(|c| channel(&c.to_string()).map(|v| v * 17));
            Some(egui::Color32::from_rgb(rgb.next()??, rgb.next()??, rgb.next()??))
        }
        6 => Some(egui::Color32::from_rgb(
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        )),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for SoundboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // --- Poll channels and input ---------------------------------------
        self.poll_events();
        self.poll_input(ctx);

        // --- Keep timers and progress bars moving ---------------------------
        if self.animating() {
            ctx.request_repaint_after(Duration::from_millis(100));
        } else if self.notice.is_some() {
            ctx.request_repaint_after(Duration::from_millis(500));
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            self.draw_grid(ui);
            ui.add_space(6.0);
            self.draw_notice(ui);
        });

        self.draw_editor(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("soundboard window closing");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::testing::wav_payload;
    use crate::storage::SlotRecord;
    use chrono::Utc;

    fn slot(i: usize) -> SlotIndex {
        SlotIndex::new(i).unwrap()
    }

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(parse_hex_color("#fff"), Some(egui::Color32::WHITE));
        assert_eq!(parse_hex_color("#0a0b0c"), Some(egui::Color32::from_rgb(10, 11, 12)));
        assert_eq!(parse_hex_color("#0af"), Some(egui::Color32::from_rgb(0, 170, 255)));
        assert_eq!(parse_hex_color("fff"), None);
        assert_eq!(parse_hex_color("#ggg"), None);
        assert_eq!(parse_hex_color("#abcd"), None);
    }

    #[test]
    fn every_palette_colour_parses() {
        for hex in crate::storage::record::TILE_PALETTE {
            assert!(parse_hex_color(hex).is_some(), "{hex}");
        }
    }

    #[test]
    fn text_contrasts_with_fill() {
        assert_eq!(text_color(egui::Color32::WHITE), egui::Color32::BLACK);
        assert_eq!(text_color(egui::Color32::from_rgb(20, 20, 60)), egui::Color32::WHITE);
    }

    #[test]
    fn captions_follow_tile_state() {
        let empty = TileData::default();
        assert_eq!(tile_caption(slot(2), &empty), "3\nTap to record");

        let mut record = SlotRecord::new(wav_payload(1.0, 0.5), Utc::now(), Some(7));
        record.label = Some("Horn".into());
        let has_sound = TileData {
            tile: Tile::HasSound { record },
            label: Some("Horn".into()),
            color: None,
        };
        assert_eq!(tile_caption(slot(0), &has_sound), "Horn\n7s");

        let error = TileData {
            tile: Tile::Error {
                message: "Microphone not available.".into(),
                record: None,
            },
            ..TileData::default()
        };
        assert_eq!(tile_caption(slot(4), &error), "Sound 5\nMicrophone not available.");
    }

    #[test]
    fn playback_clock_progress_is_clamped() {
        let clock = PlaybackClock {
            since: Instant::now(),
            duration: 0.0,
        };
        assert_eq!(clock.progress(), 1.0);

        let clock = PlaybackClock {
            since: Instant::now(),
            duration: 60.0,
        };
        assert!(clock.progress() < 0.1);
    }

    #[test]
    fn slot_keys_cover_every_slot() {
        assert_eq!(SLOT_KEYS.len(), SlotIndex::all().count());
    }
}
