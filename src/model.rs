use std::path::PathBuf;

use crate::catalog::Catalog;
use crate::error::DownloadError;

/// One selectable stream as reported by the extractor
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    /// Extractor format id, e.g. "137"
    pub id: String,
    /// File extension of the stream, e.g. "mp4"
    pub container: String,
    /// Resolution text, or an audio marker for audio-only streams
    pub resolution: String,
    pub fps: Option<f64>,
    /// Audio bitrate in kbps
    pub bitrate: Option<f64>,
    pub size_bytes: Option<u64>,
    pub has_video: bool,
    pub has_audio: bool,
}

impl FormatDescriptor {
    /// A descriptor with neither video nor audio is not worth listing.
    pub fn is_usable(&self) -> bool {
        self.has_video || self.has_audio
    }
}

/// Result of a successful discover call
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub thumbnail: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

/// Everything the worker needs to run one download.
/// Captured when the user presses Download and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
    pub destination: PathBuf,
    /// Video title, used to name the output file
    pub title: String,
}

/// Session state as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    Idle,
    /// Discover is running
    Fetching,
    AwaitingSelection,
    Downloading,
    /// Cancel was requested; the worker has not stopped yet
    Cancelling,
    Completed,
    Failed,
}

/// The three screens of the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Input,
    Selection,
    Progress,
}

impl DownloadState {
    pub fn stage(self) -> Stage {
        match self {
            Self::Idle | Self::Fetching => Stage::Input,
            Self::AwaitingSelection => Stage::Selection,
            Self::Downloading | Self::Cancelling => Stage::Progress,
            // The outcome dialog is drawn over whatever screen produced it
            Self::Completed => Stage::Progress,
            Self::Failed => Stage::Input,
        }
    }

    /// True while a worker may still be running
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Fetching | Self::Downloading | Self::Cancelling)
    }
}

/// One normalized progress tick
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// 0.0 to 100.0
    pub percent: f32,
    pub rate: String,
    pub eta: String,
}

/// How a download that did not fail ended
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Completed { path: PathBuf },
    Cancelled,
}

/// Messages from a worker to the session, in the order they were produced
#[derive(Debug)]
pub enum WorkerEvent {
    Discovered { info: VideoInfo, catalog: Catalog },
    DiscoverFailed(DownloadError),
    Progress(ProgressUpdate),
    /// Download finished, post-processing (merge, fixups) is running
    Finalizing,
    Finished(FetchOutcome),
    DownloadFailed(DownloadError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_state() {
        assert_eq!(DownloadState::Idle.stage(), Stage::Input);
        assert_eq!(DownloadState::Fetching.stage(), Stage::Input);
        assert_eq!(DownloadState::AwaitingSelection.stage(), Stage::Selection);
        assert_eq!(DownloadState::Cancelling.stage(), Stage::Progress);
    }

    #[test]
    fn busy_states() {
        assert!(DownloadState::Downloading.is_busy());
        assert!(DownloadState::Cancelling.is_busy());
        assert!(!DownloadState::Completed.is_busy());
        assert!(!DownloadState::AwaitingSelection.is_busy());
    }
}
