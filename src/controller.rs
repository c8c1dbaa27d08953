//! Session state shared between the UI thread and the background workers.
//!
//! The UI owns a [`Session`]. Workers only get a [`ProgressSink`] (the
//! sending half of the session's event channel) and, for downloads, a
//! [`CancellationToken`]. The UI applies queued events with
//! [`Session::poll`] once per frame.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::error::DownloadError;
use crate::model::{DownloadRequest, DownloadState, FetchOutcome, ProgressUpdate, VideoInfo, WorkerEvent};
use crate::progress::status_line;

/// Called after every event so the UI can repaint
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Worker side of a session. Sending never blocks.
#[derive(Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<WorkerEvent>,
    waker: Option<Waker>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<WorkerEvent>, waker: Option<Waker>) -> Self {
        Self { tx, waker }
    }

    pub fn on_progress(&self, update: ProgressUpdate) {
        self.send(WorkerEvent::Progress(update));
    }

    pub fn on_finalizing(&self) {
        self.send(WorkerEvent::Finalizing);
    }

    pub fn send(&self, event: WorkerEvent) {
        if self.tx.send(event).is_err() {
            // The session is gone, nobody is listening anymore
            debug!("Dropping worker event, session closed");
            return;
        }
        if let Some(wake) = &self.waker {
            wake();
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

/// A message box the UI should show until the user dismisses it
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    fn from_error(err: &DownloadError) -> Self {
        let message = match err {
            DownloadError::Discovery(msg) => format!("Failed to fetch formats:\n{}", msg),
            other => other.to_string(),
        };
        Self {
            kind: if err.is_warning() { NoticeKind::Warning } else { NoticeKind::Error },
            title: err.title().to_string(),
            message,
        }
    }
}

/// A state change applied by [`Session::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DownloadState,
    pub to: DownloadState,
}

/// One user's discover/download flow
pub struct Session {
    state: DownloadState,
    cancel: CancellationToken,
    tx: UnboundedSender<WorkerEvent>,
    rx: UnboundedReceiver<WorkerEvent>,
    waker: Option<Waker>,
    info: Option<VideoInfo>,
    catalog: Option<Catalog>,
    percent: f32,
    status: String,
    notice: Option<Notice>,
    last_output: Option<std::path::PathBuf>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Session {
    pub fn new(waker: Option<Waker>) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            state: DownloadState::Idle,
            cancel: CancellationToken::new(),
            tx,
            rx,
            waker,
            info: None,
            catalog: None,
            percent: 0.0,
            status: "Idle".to_string(),
            notice: None,
            last_output: None,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn info(&self) -> Option<&VideoInfo> {
        self.info.as_ref()
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Progress bar value, 0.0 to 100.0
    pub fn percent(&self) -> f32 {
        self.percent
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// File written by the last completed download
    pub fn last_output(&self) -> Option<&std::path::Path> {
        self.last_output.as_deref()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn sink(&self) -> ProgressSink {
        ProgressSink::new(self.tx.clone(), self.waker.clone())
    }

    /// Shows `err` without changing state. Used for problems found before
    /// a worker starts.
    pub fn report(&mut self, err: &DownloadError) {
        warn!("{}: {}", err.title(), err);
        self.notice = Some(Notice::from_error(err));
    }

    /// Moves to `Fetching` and returns the trimmed url and the sink the
    /// discover worker reports to.
    pub fn begin_discover(&mut self, url: &str) -> Result<(String, ProgressSink), DownloadError> {
        if self.state.is_busy() {
            return Err(DownloadError::Busy);
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::Input("Please enter a video URL.".to_string()));
        }

        self.info = None;
        self.catalog = None;
        self.set_state(DownloadState::Fetching);
        self.status = "Fetching formats...".to_string();
        Ok((url.to_string(), self.sink()))
    }

    /// Checks the user's choices against the last catalog. Does not change
    /// state; a missing destination folder falls back to the default one.
    pub fn prepare_fetch(
        &self,
        url: &str,
        format_label: &str,
        destination: &str,
        config: &AppConfig,
    ) -> Result<DownloadRequest, DownloadError> {
        if self.state.is_busy() {
            return Err(DownloadError::Busy);
        }
        let (Some(catalog), Some(info)) = (&self.catalog, &self.info) else {
            return Err(DownloadError::Input("Fetch the video formats first.".to_string()));
        };

        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::Input("Please enter a video URL.".to_string()));
        }
        let Some(format_id) = catalog.id_for_label(format_label) else {
            return Err(DownloadError::Input("Please select a format.".to_string()));
        };

        Ok(DownloadRequest {
            url: url.to_string(),
            format_id: format_id.to_string(),
            destination: config.resolve_destination(destination),
            title: info.title.clone(),
        })
    }

    /// Moves to `Downloading` with a fresh cancellation token. Refused while
    /// another worker runs.
    pub fn begin_fetch(&mut self) -> Result<(ProgressSink, CancellationToken), DownloadError> {
        if self.state.is_busy() {
            return Err(DownloadError::Busy);
        }
        if self.state != DownloadState::AwaitingSelection {
            return Err(DownloadError::Input("Fetch the video formats first.".to_string()));
        }

        self.cancel = CancellationToken::new();
        self.percent = 0.0;
        self.last_output = None;
        self.set_state(DownloadState::Downloading);
        self.status = "Starting download...".to_string();
        Ok((self.sink(), self.cancel.clone()))
    }

    /// Raises the cancel flag. The worker sees it on its next progress tick.
    pub fn request_cancel(&mut self) -> bool {
        if self.state != DownloadState::Downloading {
            return false;
        }
        self.cancel.cancel();
        self.set_state(DownloadState::Cancelling);
        self.status = "Cancelling...".to_string();
        true
    }

    /// Back to `Idle` with a cleared flag. Refused while a worker runs.
    pub fn reset(&mut self) -> Result<(), DownloadError> {
        if self.state.is_busy() {
            return Err(DownloadError::Busy);
        }
        self.clear();
        Ok(())
    }

    /// Closes the current notice, returning to `Idle` after a finished or
    /// failed request.
    pub fn dismiss_notice(&mut self) {
        self.notice = None;
        if matches!(self.state, DownloadState::Completed | DownloadState::Failed) {
            self.clear();
        }
    }

    /// Applies every queued worker event, in order.
    pub fn poll(&mut self) -> Vec<Transition> {
        let mut transitions = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            let from = self.state;
            self.apply(event);
            if self.state != from {
                transitions.push(Transition { from, to: self.state });
            }
        }
        transitions
    }

    fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Discovered { info, catalog } => {
                if self.state != DownloadState::Fetching {
                    warn!("Ignoring formats that arrived while {:?}", self.state);
                    return;
                }
                self.info = Some(info);
                self.catalog = Some(catalog);
                self.status = "Select a format".to_string();
                self.set_state(DownloadState::AwaitingSelection);
            }
            WorkerEvent::DiscoverFailed(err) => {
                self.notice = Some(Notice::from_error(&err));
                self.status = "Failed".to_string();
                self.set_state(DownloadState::Failed);
            }
            WorkerEvent::Progress(update) => {
                self.percent = update.percent;
                if self.state == DownloadState::Downloading {
                    self.status = status_line(&update);
                }
            }
            WorkerEvent::Finalizing => {
                self.percent = 100.0;
                if self.state == DownloadState::Downloading {
                    self.status = "Finalizing...".to_string();
                }
            }
            WorkerEvent::Finished(FetchOutcome::Completed { path }) => {
                self.percent = 100.0;
                self.status = "Download complete.".to_string();
                self.notice = Some(Notice {
                    kind: NoticeKind::Info,
                    title: "Done".to_string(),
                    message: format!("Download complete!\n{}", path.display()),
                });
                self.last_output = Some(path);
                self.set_state(DownloadState::Completed);
            }
            WorkerEvent::Finished(FetchOutcome::Cancelled) => {
                info!("Download cancelled by user");
                self.clear();
            }
            WorkerEvent::DownloadFailed(err) => {
                self.notice = Some(Notice::from_error(&err));
                self.status = "Failed".to_string();
                self.set_state(DownloadState::Failed);
            }
        }
    }

    fn set_state(&mut self, state: DownloadState) {
        if self.state != state {
            info!("Session {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn clear(&mut self) {
        self.cancel = CancellationToken::new();
        self.info = None;
        self.catalog = None;
        self.percent = 0.0;
        self.status = "Idle".to_string();
        self.notice = None;
        self.set_state(DownloadState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormatDescriptor;

    fn formats() -> Vec<FormatDescriptor> {
        vec![
            FormatDescriptor {
                id: "137".to_string(),
                container: "mp4".to_string(),
                resolution: "1080p".to_string(),
                fps: None,
                bitrate: None,
                size_bytes: Some(52_428_800),
                has_video: true,
                has_audio: false,
            },
            FormatDescriptor {
                id: "140".to_string(),
                container: "m4a".to_string(),
                resolution: "audio".to_string(),
                fps: None,
                bitrate: None,
                size_bytes: None,
                has_video: false,
                has_audio: true,
            },
        ]
    }

    fn discovered(session: &mut Session) -> ProgressSink {
        let (_, sink) = session.begin_discover(" https://example.com/v ").unwrap();
        let info = VideoInfo {
            title: "Clip".to_string(),
            thumbnail: None,
            formats: formats(),
        };
        let catalog = Catalog::build(&info.formats).unwrap();
        sink.send(WorkerEvent::Discovered { info, catalog });
        session.poll();
        sink
    }

    fn update(percent: f32) -> ProgressUpdate {
        ProgressUpdate {
            percent,
            rate: "2.00MiB/s".to_string(),
            eta: "00:05".to_string(),
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            download_dir: Some(std::env::temp_dir()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn empty_url_is_an_input_error() {
        let mut session = Session::default();
        assert!(matches!(session.begin_discover("   "), Err(DownloadError::Input(_))));
        assert_eq!(session.state(), DownloadState::Idle);
    }

    #[test]
    fn discover_moves_to_selection() {
        let mut session = Session::default();
        let (url, sink) = session.begin_discover(" https://example.com/v ").unwrap();
        assert_eq!(url, "https://example.com/v");
        assert_eq!(session.state(), DownloadState::Fetching);

        let info = VideoInfo {
            title: "Clip".to_string(),
            thumbnail: None,
            formats: formats(),
        };
        let catalog = Catalog::build(&info.formats).unwrap();
        sink.send(WorkerEvent::Discovered { info, catalog });

        let transitions = session.poll();
        assert_eq!(
            transitions,
            vec![Transition {
                from: DownloadState::Fetching,
                to: DownloadState::AwaitingSelection
            }]
        );
        assert_eq!(session.catalog().unwrap().entries().len(), 2);
    }

    #[test]
    fn discover_failure_shows_notice_then_resets() {
        let mut session = Session::default();
        let (_, sink) = session.begin_discover("bad").unwrap();
        sink.send(WorkerEvent::DiscoverFailed(DownloadError::Discovery(
            "ERROR: 'bad' is not a valid URL".to_string(),
        )));
        session.poll();

        assert_eq!(session.state(), DownloadState::Failed);
        let notice = session.notice().unwrap();
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.ends_with("ERROR: 'bad' is not a valid URL"));

        session.dismiss_notice();
        assert_eq!(session.state(), DownloadState::Idle);
    }

    #[test]
    fn no_formats_is_a_warning() {
        let mut session = Session::default();
        let (_, sink) = session.begin_discover("https://example.com/v").unwrap();
        sink.send(WorkerEvent::DiscoverFailed(DownloadError::NoFormats));
        session.poll();
        assert_eq!(session.notice().unwrap().kind, NoticeKind::Warning);
    }

    #[test]
    fn prepare_fetch_validates_selection() {
        let mut session = Session::default();
        discovered(&mut session);

        let err = session
            .prepare_fetch("https://example.com/v", "not a label", "", &config())
            .unwrap_err();
        assert!(matches!(err, DownloadError::Input(_)));

        let err = session
            .prepare_fetch("", "137 | 1080p | mp4 | | | 50.0MB", "", &config())
            .unwrap_err();
        assert!(matches!(err, DownloadError::Input(_)));

        let request = session
            .prepare_fetch("https://example.com/v", "137 | 1080p | mp4 | | | 50.0MB", "", &config())
            .unwrap();
        assert_eq!(request.format_id, "137");
        assert_eq!(request.title, "Clip");
        assert_eq!(session.state(), DownloadState::AwaitingSelection);
    }

    #[test]
    fn missing_folder_falls_back_to_default_and_fetch_proceeds() {
        let mut session = Session::default();
        discovered(&mut session);

        let missing = std::env::temp_dir().join("video-downloader-missing").join("x");
        let request = session
            .prepare_fetch(
                "https://example.com/v",
                "140 | audio | m4a | | | ?",
                &missing.to_string_lossy(),
                &config(),
            )
            .unwrap();
        assert_eq!(request.destination, std::env::temp_dir());
        assert!(session.begin_fetch().is_ok());
        assert_eq!(session.state(), DownloadState::Downloading);
    }

    #[test]
    fn second_fetch_is_refused_while_one_runs() {
        let mut session = Session::default();
        discovered(&mut session);
        session.begin_fetch().unwrap();

        assert!(matches!(session.begin_fetch(), Err(DownloadError::Busy)));
        assert!(matches!(session.begin_discover("https://example.com/w"), Err(DownloadError::Busy)));
        assert!(matches!(session.reset(), Err(DownloadError::Busy)));
    }

    #[test]
    fn progress_and_completion() {
        let mut session = Session::default();
        discovered(&mut session);
        let (sink, _cancel) = session.begin_fetch().unwrap();

        sink.on_progress(update(45.2));
        session.poll();
        assert_eq!(session.percent(), 45.2);
        assert_eq!(session.status(), "45.2% at 2.00MiB/s | ETA: 00:05");

        sink.on_finalizing();
        session.poll();
        assert_eq!(session.percent(), 100.0);
        assert_eq!(session.status(), "Finalizing...");

        let path = std::env::temp_dir().join("Clip.mp4");
        sink.send(WorkerEvent::Finished(FetchOutcome::Completed { path: path.clone() }));
        session.poll();
        assert_eq!(session.state(), DownloadState::Completed);
        assert_eq!(session.last_output(), Some(path.as_path()));
        assert_eq!(session.notice().unwrap().title, "Done");

        session.dismiss_notice();
        assert_eq!(session.state(), DownloadState::Idle);
        assert!(session.catalog().is_none());
    }

    #[test]
    fn cancel_sets_flag_before_worker_notices() {
        let mut session = Session::default();
        discovered(&mut session);
        let (sink, cancel) = session.begin_fetch().unwrap();

        assert!(!session.cancel_requested());
        assert!(session.request_cancel());
        assert!(cancel.is_cancelled());
        assert!(session.cancel_requested());
        assert_eq!(session.state(), DownloadState::Cancelling);
        assert_eq!(session.status(), "Cancelling...");

        // A tick sent before the worker saw the flag still moves the bar
        sink.on_progress(update(50.0));
        session.poll();
        assert_eq!(session.percent(), 50.0);
        assert_eq!(session.status(), "Cancelling...");

        sink.send(WorkerEvent::Finished(FetchOutcome::Cancelled));
        session.poll();
        assert_eq!(session.state(), DownloadState::Idle);
        assert!(session.notice().is_none());
        assert!(!session.cancel_requested());
    }

    #[test]
    fn cancel_outside_download_does_nothing() {
        let mut session = Session::default();
        assert!(!session.request_cancel());
        assert_eq!(session.state(), DownloadState::Idle);
    }

    #[test]
    fn download_failure_is_reported() {
        let mut session = Session::default();
        discovered(&mut session);
        let (sink, _cancel) = session.begin_fetch().unwrap();

        sink.send(WorkerEvent::DownloadFailed(DownloadError::Download("ERROR: 403".to_string())));
        session.poll();
        assert_eq!(session.state(), DownloadState::Failed);
        assert_eq!(session.notice().unwrap().message, "ERROR: 403");
        assert!(session.reset().is_ok());
        assert_eq!(session.state(), DownloadState::Idle);
    }

    #[test]
    fn sink_wakes_the_ui() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        let mut session = Session::new(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let (_, sink) = session.begin_discover("https://example.com/v").unwrap();

        sink.send(WorkerEvent::DiscoverFailed(DownloadError::NoFormats));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }
}
