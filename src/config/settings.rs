//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Missing keys fall back to their defaults, so an old `settings.toml` keeps
//! loading after new options are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::format::PREFERRED_MEDIA_TYPES;
use crate::audio::trim::DEFAULT_SILENCE_THRESHOLD;
use crate::audio::{CaptureConstraints, RecordingLimits};

// ---------------------------------------------------------------------------
// RecordingConfig
// ---------------------------------------------------------------------------

/// Recording session limits and container preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Seconds after which the tile shows the "almost full" warning.
    pub warning_secs: u64,
    /// Hard cap; the session stops itself after this many seconds.
    pub max_secs: u64,
    /// Media types to try, most preferred first.
    pub preferred_media_types: Vec<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            warning_secs: 25,
            max_secs: 30,
            preferred_media_types: PREFERRED_MEDIA_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RecordingConfig {
    /// Session timers. A warning set past the cap is pulled back to it.
    pub fn limits(&self) -> RecordingLimits {
        let max_duration = Duration::from_secs(self.max_secs.max(1));
        RecordingLimits {
            warning_after: Duration::from_secs(self.warning_secs).min(max_duration),
            max_duration,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Microphone processing requested when the input stream is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl CaptureConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
        }
    }
}

// ---------------------------------------------------------------------------
// TrimConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Absolute sample amplitude (0.0 – 1.0) above which audio counts as sound.
    pub silence_threshold: f32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig / ExportConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where slot files live. `None` means [`AppPaths::slots_dir`].
    pub slots_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve(&self, paths: &AppPaths) -> PathBuf {
        self.slots_dir.clone().unwrap_or_else(|| paths.slots_dir.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Target directory for exported sounds. `None` means
    /// [`AppPaths::export_dir`].
    pub dir: Option<PathBuf>,
}

impl ExportConfig {
    pub fn resolve(&self, paths: &AppPaths) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| paths.export_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// egui window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Keep the board floating above all other windows.
    pub always_on_top: bool,
    /// Initial inner window size `(width, height)` in logical pixels.
    pub window_size: (f32, f32),
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            always_on_top: false,
            window_size: (420.0, 460.0),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use soundboard::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recording: RecordingConfig,
    pub capture: CaptureConfig,
    pub trim: TrimConfig,
    pub storage: StorageConfig,
    pub export: ExportConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.recording.warning_secs, loaded.recording.warning_secs);
        assert_eq!(original.recording.max_secs, loaded.recording.max_secs);
        assert_eq!(
            original.recording.preferred_media_types,
            loaded.recording.preferred_media_types
        );
        assert_eq!(original.capture.constraints(), loaded.capture.constraints());
        assert_eq!(original.trim.silence_threshold, loaded.trim.silence_threshold);
        assert_eq!(original.storage.slots_dir, loaded.storage.slots_dir);
        assert_eq!(original.ui.window_size, loaded.ui.window_size);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.recording.max_secs, 30);
        assert!(config.export.dir.is_none());
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.recording.warning_secs, 25);
        assert_eq!(cfg.recording.max_secs, 30);
        assert_eq!(cfg.recording.preferred_media_types[0], "audio/webm;codecs=opus");
        assert_eq!(cfg.capture.constraints(), CaptureConstraints::default());
        assert_eq!(cfg.trim.silence_threshold, 0.01);
        assert_eq!(cfg.recording.limits(), RecordingLimits::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[recording]\nmax_secs = 10\n\n[capture]\nnoise_suppression = false\n").unwrap();

        let cfg = AppConfig::load_from(&path).expect("load");

        assert_eq!(cfg.recording.max_secs, 10);
        assert_eq!(cfg.recording.warning_secs, 25);
        assert!(!cfg.capture.noise_suppression);
        assert!(cfg.capture.echo_cancellation);
        assert_eq!(cfg.trim.silence_threshold, 0.01);
    }

    #[test]
    fn warning_is_clamped_to_the_cap() {
        let cfg = RecordingConfig {
            warning_secs: 40,
            max_secs: 10,
            ..RecordingConfig::default()
        };
        let limits = cfg.limits();
        assert_eq!(limits.warning_after, Duration::from_secs(10));
        assert_eq!(limits.max_duration, Duration::from_secs(10));
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.storage.slots_dir = Some(PathBuf::from("/tmp/slots"));
        cfg.export.dir = Some(PathBuf::from("/tmp/exports"));
        cfg.trim.silence_threshold = 0.05;
        cfg.ui.always_on_top = true;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        let paths = AppPaths::new();
        assert_eq!(loaded.storage.resolve(&paths), PathBuf::from("/tmp/slots"));
        assert_eq!(loaded.export.resolve(&paths), PathBuf::from("/tmp/exports"));
        assert_eq!(loaded.trim.silence_threshold, 0.05);
        assert!(loaded.ui.always_on_top);
    }
}
