//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\soundboard\
//!   macOS:   ~/Library/Application Support/soundboard/
//!   Linux:   ~/.config/soundboard/
//!
//! Data dir (recorded slots):
//!   Windows: %LOCALAPPDATA%\soundboard\slots\
//!   macOS:   ~/Library/Application Support/soundboard/slots/
//!   Linux:   ~/.local/share/soundboard/slots/
//!
//! Exports go to the user's audio directory, then downloads, then home.

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    pub data_dir: PathBuf,
    /// One `slot-N.json` + `slot-N.bin` pair per recorded slot.
    pub slots_dir: PathBuf,
    /// Default target for exported sounds.
    pub export_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "soundboard";

    /// Resolves all paths, falling back to the current directory where the
    /// platform has no standard location.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let export_dir = dirs::audio_dir()
            .or_else(dirs::download_dir)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            settings_file: config_dir.join("settings.toml"),
            slots_dir: data_dir.join("slots"),
            config_dir,
            data_dir,
            export_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.export_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
    }

    #[test]
    fn slots_live_under_the_data_dir() {
        let paths = AppPaths::new();
        assert!(paths.slots_dir.starts_with(&paths.data_dir));
        assert!(paths.data_dir.ends_with("soundboard"));
    }
}
