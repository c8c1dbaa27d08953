//! Discover and download, run off the UI thread.
//!
//! The actual extraction and transfer is done by yt-dlp behind the
//! [`MediaBackend`] trait. This module owns what happens around it: building
//! the catalog, forwarding progress, and turning a user cancel into
//! [`FetchOutcome::Cancelled`] instead of an error.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::controller::ProgressSink;
use crate::error::DownloadError;
use crate::filename::{output_path, output_template, sanitize_title};
use crate::model::{DownloadRequest, FetchOutcome, FormatDescriptor, VideoInfo, WorkerEvent};
use crate::progress::{is_postprocess_line, parse_tick_line, progress_template, RawTick, TickStatus};
use crate::tools::{self, Tool};

/// Something the backend reports while a download runs
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Tick(RawTick),
    /// A post-processor line such as `[Merger] Merging formats into ...`
    Postprocess(String),
}

/// How the backend's download call ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadExit {
    Finished,
    /// The event handler asked to stop and the transfer was killed
    Aborted,
}

/// Called for every backend event. Returning `Break` aborts the download;
/// the backend must not call the handler again after that.
pub type EventHandler<'a> = dyn FnMut(BackendEvent) -> ControlFlow<()> + Send + 'a;

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    async fn discover(&self, url: &str) -> Result<VideoInfo, DownloadError>;

    async fn download(
        &self,
        job: &DownloadJob,
        on_event: &mut EventHandler<'_>,
    ) -> Result<DownloadExit, DownloadError>;
}

/// `"{id}+bestaudio/best"`: the chosen stream plus the best audio track,
/// or yt-dlp's best single file if that pairing is not possible
pub fn format_expression(format_id: &str) -> String {
    format!("{}+bestaudio/best", format_id)
}

/// A validated request plus everything yt-dlp needs to run it
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub url: String,
    pub format_expression: String,
    pub destination: PathBuf,
    /// File name without extension
    pub stem: String,
    pub output_template: String,
    pub ffmpeg: PathBuf,
    pub merge_output_format: String,
}

impl DownloadJob {
    /// Fails with a configuration error when ffmpeg cannot be found, before
    /// anything touches the network.
    pub fn prepare(request: &DownloadRequest, config: &AppConfig) -> Result<Self, DownloadError> {
        let ffmpeg = tools::locate(Tool::Ffmpeg, config)?;
        Ok(Self::with_ffmpeg(request, ffmpeg, &config.merge_output_format))
    }

    pub fn with_ffmpeg(request: &DownloadRequest, ffmpeg: PathBuf, merge_output_format: &str) -> Self {
        Self {
            url: request.url.clone(),
            format_expression: format_expression(&request.format_id),
            destination: request.destination.clone(),
            stem: sanitize_title(&request.title),
            output_template: output_template(&request.destination, &request.title),
            ffmpeg,
            merge_output_format: merge_output_format.to_string(),
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            self.format_expression.clone(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            progress_template(),
            "--ffmpeg-location".to_string(),
            self.ffmpeg.to_string_lossy().into_owned(),
            "--merge-output-format".to_string(),
            self.merge_output_format.clone(),
            "-o".to_string(),
            self.output_template.clone(),
        ]
    }
}

pub async fn discover(backend: &dyn MediaBackend, url: &str) -> Result<(VideoInfo, Catalog), DownloadError> {
    info!("[{}] Fetching formats for {}", backend.name(), url);
    let info = backend.discover(url).await?;
    let catalog = Catalog::build(&info.formats)?;
    info!(
        "Found {} usable formats of {} for \"{}\"",
        catalog.entries().len(),
        info.formats.len(),
        info.title
    );
    Ok((info, catalog))
}

/// Runs [`discover`] and reports the result to `sink`.
pub async fn run_discover(backend: Arc<dyn MediaBackend>, url: String, sink: ProgressSink) {
    match discover(backend.as_ref(), &url).await {
        Ok((info, catalog)) => sink.send(WorkerEvent::Discovered { info, catalog }),
        Err(e) => {
            warn!("Discover failed for {}: {}", url, e);
            sink.send(WorkerEvent::DiscoverFailed(e));
        }
    }
}

/// Downloads `job`, forwarding progress to `sink`.
///
/// `cancel` is checked on every event the backend reports. Once it is seen
/// set, the backend is told to abort and nothing more reaches the sink. A
/// backend error while `cancel` is set also counts as a cancel.
pub async fn fetch(
    backend: &dyn MediaBackend,
    job: &DownloadJob,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, DownloadError> {
    info!("[{}] Downloading {} as {}", backend.name(), job.url, job.format_expression);

    let mut handler = |event: BackendEvent| -> ControlFlow<()> {
        if cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        match event {
            BackendEvent::Tick(tick) if tick.status == TickStatus::Finished => sink.on_finalizing(),
            BackendEvent::Tick(tick) => sink.on_progress(tick.normalize()),
            BackendEvent::Postprocess(_) => sink.on_finalizing(),
        }
        ControlFlow::Continue(())
    };

    match backend.download(job, &mut handler).await {
        Ok(DownloadExit::Finished) => {
            let path = find_output(&job.destination, &job.stem, &job.merge_output_format);
            info!("Download complete: {}", path.display());
            Ok(FetchOutcome::Completed { path })
        }
        Ok(DownloadExit::Aborted) => {
            info!("Download cancelled: {}", job.url);
            Ok(FetchOutcome::Cancelled)
        }
        Err(e) if cancel.is_cancelled() => {
            info!("Download stopped after cancel: {}", e);
            Ok(FetchOutcome::Cancelled)
        }
        Err(e) => Err(e),
    }
}

/// Runs [`fetch`] and reports the terminal result to `sink`, after all
/// progress it produced.
pub async fn run_fetch(
    backend: Arc<dyn MediaBackend>,
    job: DownloadJob,
    sink: ProgressSink,
    cancel: CancellationToken,
) {
    match fetch(backend.as_ref(), &job, &sink, &cancel).await {
        Ok(outcome) => sink.send(WorkerEvent::Finished(outcome)),
        Err(e) => {
            warn!("Download failed for {}: {}", job.url, e);
            sink.send(WorkerEvent::DownloadFailed(e));
        }
    }
}

/// The newest finished file named `{stem}.*` in `dir`, or the expected
/// merged file name if none is there.
fn find_output(dir: &Path, stem: &str, fallback_ext: &str) -> PathBuf {
    let newest = std::fs::read_dir(dir).ok().and_then(|entries| {
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.file_stem().is_some_and(|s| s.to_string_lossy() == stem))
            .filter(|path| {
                !matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("part" | "ytdl" | "temp")
                )
            })
            .filter_map(|path| {
                let modified = path.metadata().and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .max_by_key(|(_, modified)| *modified)
            .map(|(path, _)| path)
    });

    newest.unwrap_or_else(|| output_path(dir, stem, fallback_ext))
}

/// The `yt-dlp` executable as a [`MediaBackend`]
pub struct YtDlpBackend {
    binary: PathBuf,
    proxy: Option<String>,
    socket_timeout_secs: Option<u32>,
    windows_filenames: bool,
}

impl YtDlpBackend {
    pub fn new(binary: PathBuf, config: &AppConfig) -> Self {
        Self {
            binary,
            proxy: config.proxy.clone(),
            socket_timeout_secs: config.socket_timeout_secs,
            windows_filenames: config.windows_filenames,
        }
    }

    /// Locates yt-dlp; a missing binary is a configuration error.
    pub fn from_config(config: &AppConfig) -> Result<Self, DownloadError> {
        Ok(Self::new(tools::locate(Tool::YtDlp, config)?, config))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.args(["--encoding", "utf-8"]);

        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

        if let Some(proxy) = &self.proxy {
            cmd.arg("--proxy").arg(proxy);
        }
        if let Some(timeout) = self.socket_timeout_secs {
            cmd.arg("--socket-timeout").arg(timeout.to_string());
        }
        if self.windows_filenames {
            cmd.arg("--windows-filenames");
        }
        cmd
    }
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn discover(&self, url: &str) -> Result<VideoInfo, DownloadError> {
        let output = self
            .command()
            .args(["--dump-single-json", "--no-playlist", "--no-warnings", "--"])
            .arg(url)
            .output()
            .await
            .map_err(|e| DownloadError::Discovery(format!("Failed to start yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DownloadError::Discovery(if stderr.is_empty() {
                format!("yt-dlp exited with {}", output.status)
            } else {
                stderr
            }));
        }

        parse_video_info(&output.stdout)
    }

    async fn download(
        &self,
        job: &DownloadJob,
        on_event: &mut EventHandler<'_>,
    ) -> Result<DownloadExit, DownloadError> {
        let mut child = self
            .command()
            .args(job.args())
            .arg("--")
            .arg(&job.url)
            .spawn()
            .map_err(|e| DownloadError::Download(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Download("Failed to capture yt-dlp output".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Download("Failed to capture yt-dlp errors".to_string()))?;
        let errors = tokio::spawn(collect_errors(stderr));

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = next_line_lossy(&mut reader, &mut buf).await? {
            debug!("yt-dlp> {}", line);
            let event = if let Some(tick) = parse_tick_line(&line) {
                BackendEvent::Tick(tick)
            } else if is_postprocess_line(&line) {
                BackendEvent::Postprocess(line)
            } else {
                continue;
            };

            if on_event(event).is_break() {
                info!("Stopping yt-dlp");
                if let Err(e) = child.kill().await {
                    warn!("Could not stop yt-dlp: {}", e);
                }
                errors.abort();
                return Ok(DownloadExit::Aborted);
            }
        }

        let status = child.wait().await?;
        let message = errors.await.unwrap_or_default();
        if status.success() {
            Ok(DownloadExit::Finished)
        } else if message.is_empty() {
            Err(DownloadError::Download(format!("yt-dlp exited with {}", status)))
        } else {
            Err(DownloadError::Download(message))
        }
    }
}

/// The `ERROR:` lines of a stream, or its last line if there are none
async fn collect_errors<R: AsyncRead + Unpin>(stream: R) -> String {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut errors = Vec::new();
    let mut last = String::new();
    while let Ok(Some(line)) = next_line_lossy(&mut reader, &mut buf).await {
        debug!("yt-dlp! {}", line);
        if line.starts_with("ERROR:") {
            errors.push(line);
        } else if !line.trim().is_empty() {
            last = line;
        }
    }
    if errors.is_empty() { last } else { errors.join("\n") }
}

/// Next line without its line ending. Bytes that are not UTF-8 (titles in a
/// console code page) are replaced instead of failing the read.
async fn next_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    abr: Option<f64>,
    #[serde(default)]
    filesize: Option<f64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
}

impl From<RawFormat> for FormatDescriptor {
    fn from(raw: RawFormat) -> Self {
        let resolution = raw
            .resolution
            .filter(|r| !r.is_empty())
            .or_else(|| raw.height.map(|h| format!("{}", h as u64)))
            .unwrap_or_else(|| "audio".to_string());

        Self {
            id: raw.format_id,
            container: raw.ext.unwrap_or_default(),
            resolution,
            fps: raw.fps,
            bitrate: raw.abr,
            // yt-dlp reports 0 for sizes it does not know
            size_bytes: raw
                .filesize
                .filter(|s| *s > 0.0)
                .or(raw.filesize_approx.filter(|s| *s > 0.0))
                .map(|s| s as u64),
            has_video: raw.vcodec.as_deref() != Some("none"),
            has_audio: raw.acodec.as_deref() != Some("none"),
        }
    }
}

/// Parses `yt-dlp --dump-single-json` output
pub fn parse_video_info(json: &[u8]) -> Result<VideoInfo, DownloadError> {
    let raw: RawInfo = serde_json::from_slice(json)?;
    Ok(VideoInfo {
        title: raw.title.unwrap_or_else(|| "video".to_string()),
        thumbnail: raw.thumbnail.filter(|t| !t.is_empty()),
        formats: raw
            .formats
            .unwrap_or_default()
            .into_iter()
            .map(FormatDescriptor::from)
            .collect(),
    })
}
