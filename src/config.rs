use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const APP_DIR: &str = "video-downloader";
const CONFIG_FILE: &str = "config.toml";

/// User settings, read from `<config dir>/video-downloader/config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// yt-dlp executable; looked up next to the app and on PATH when unset
    pub ytdlp_path: Option<PathBuf>,
    /// ffmpeg executable; looked up next to the app and on PATH when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Default destination folder
    pub download_dir: Option<PathBuf>,
    /// Container used when video and audio are merged
    pub merge_output_format: String,
    /// Ask yt-dlp for Windows-safe file names
    pub windows_filenames: bool,
    pub proxy: Option<String>,
    pub socket_timeout_secs: Option<u32>,
    /// tracing level: error, warn, info, debug or trace
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            download_dir: None,
            merge_output_format: "mp4".to_string(),
            windows_filenames: cfg!(target_os = "windows"),
            proxy: None,
            socket_timeout_secs: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Loads the user config. A missing or broken file gives the defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match toml::from_str(&text) {
            Ok(config) => {
                info!("Loaded settings from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring invalid settings in {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Where downloads go when the user picks nothing usable: the configured
    /// folder, then the user's Downloads folder, then the working directory.
    pub fn default_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .filter(|dir| dir.is_dir())
            .or_else(|| dirs::download_dir().filter(|dir| dir.is_dir()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// `chosen` when it is an existing folder, otherwise the default
    pub fn resolve_destination(&self, chosen: &str) -> PathBuf {
        let chosen = chosen.trim();
        if !chosen.is_empty() {
            let path = PathBuf::from(chosen);
            if path.is_dir() {
                return path;
            }
            warn!("Folder {} does not exist, using the default", path.display());
        }
        self.default_download_dir()
    }
}
