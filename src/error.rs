use thiserror::Error;

/// Everything that can end a discover or download request.
///
/// A user cancel is not in here: it ends a download with
/// [`FetchOutcome::Cancelled`](crate::model::FetchOutcome::Cancelled).
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Missing url or format; the user is asked again
    #[error("{0}")]
    Input(String),

    /// The page was read but nothing downloadable was listed
    #[error("No downloadable formats found.")]
    NoFormats,

    /// yt-dlp could not extract the url. The message is yt-dlp's own.
    #[error("{0}")]
    Discovery(String),

    /// A required executable is missing
    #[error("{0}")]
    Configuration(String),

    /// yt-dlp failed while downloading
    #[error("{0}")]
    Download(String),

    /// A worker is already running for this session
    #[error("A download is already in progress.")]
    Busy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not read yt-dlp output: {0}")]
    Json(#[from] serde_json::Error),
}

impl DownloadError {
    /// Heading for the dialog that reports this error.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Input(_) => "Input Error",
            Self::NoFormats => "No Formats",
            Self::Discovery(_) => "Failed to fetch formats",
            Self::Configuration(_) => "Configuration Error",
            Self::Busy => "Busy",
            Self::Download(_) | Self::Io(_) | Self::Json(_) => "Error",
        }
    }

    /// Input problems are warnings; the rest are errors.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Input(_) | Self::NoFormats | Self::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_message_is_verbatim() {
        let msg = "ERROR: [generic] 'nope' is not a valid URL.";
        let err = DownloadError::Discovery(msg.to_string());
        assert_eq!(err.to_string(), msg);
    }

    #[test]
    fn no_formats_is_not_a_hard_failure() {
        assert!(DownloadError::NoFormats.is_warning());
        assert!(!DownloadError::Discovery("x".into()).is_warning());
        assert_ne!(
            DownloadError::NoFormats.title(),
            DownloadError::Discovery("x".into()).title()
        );
    }
}
