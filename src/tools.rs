use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::DownloadError;

/// External executables the app drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    YtDlp,
    Ffmpeg,
}

impl Tool {
    pub fn binary_name(self) -> &'static str {
        match (self, cfg!(target_os = "windows")) {
            (Tool::YtDlp, true) => "yt-dlp.exe",
            (Tool::YtDlp, false) => "yt-dlp",
            (Tool::Ffmpeg, true) => "ffmpeg.exe",
            (Tool::Ffmpeg, false) => "ffmpeg",
        }
    }

    fn configured(self, config: &AppConfig) -> Option<&Path> {
        match self {
            Tool::YtDlp => config.ytdlp_path.as_deref(),
            Tool::Ffmpeg => config.ffmpeg_path.as_deref(),
        }
    }
}

/// Finds `tool`: the configured path, then next to our own executable,
/// then PATH.
///
/// A configured path that does not exist is an error even if PATH has the
/// tool, so a typo in the settings is not silently ignored.
pub fn locate(tool: Tool, config: &AppConfig) -> Result<PathBuf, DownloadError> {
    if let Some(path) = tool.configured(config) {
        let path = if path.is_dir() { path.join(tool.binary_name()) } else { path.to_path_buf() };
        if path.is_file() {
            debug!("Using configured {} at {}", tool.binary_name(), path.display());
            return Ok(path);
        }
        return Err(DownloadError::Configuration(format!(
            "{} not found at:\n{}",
            tool.binary_name(),
            path.display()
        )));
    }

    if let Some(path) = beside_executable(tool) {
        info!("Found bundled {} at {}", tool.binary_name(), path.display());
        return Ok(path);
    }

    which::which(tool.binary_name()).map_err(|_| {
        DownloadError::Configuration(format!(
            "{} was not found. Install it or set its path in {}.",
            tool.binary_name(),
            AppConfig::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.toml".to_string())
        ))
    })
}

fn beside_executable(tool: Tool) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join(tool.binary_name());
    candidate.is_file().then_some(candidate)
}
