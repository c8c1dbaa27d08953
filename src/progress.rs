use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::ProgressUpdate;

/// Prefix of the lines yt-dlp prints through our progress template
pub const TICK_MARKER: &str = "vdl-progress";

/// Post-processors yt-dlp runs after the transfer, while the file is finalized
const POSTPROCESS_TAGS: [&str; 6] = [
    "[Merger]",
    "[ExtractAudio]",
    "[FixupM3u8]",
    "[FixupM4a]",
    "[FixupStretched]",
    "[MoveFiles]",
];

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid ANSI regex"));

/// Value for yt-dlp's `--progress-template`
pub fn progress_template() -> String {
    format!(
        "download:{}|%(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s",
        TICK_MARKER
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStatus {
    Downloading,
    /// Transfer done, file not finalized yet
    Finished,
    Other(String),
}

/// A progress tick as yt-dlp printed it, before any cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    pub status: TickStatus,
    pub percent: String,
    pub speed: String,
    pub eta: String,
}

impl RawTick {
    pub fn normalize(&self) -> ProgressUpdate {
        ProgressUpdate {
            percent: parse_percent(&self.percent),
            rate: clean_field(&self.speed, "0.0 KiB/s"),
            eta: clean_field(&self.eta, "??"),
        }
    }
}

pub fn parse_tick_line(line: &str) -> Option<RawTick> {
    let rest = line.trim().strip_prefix(TICK_MARKER)?.strip_prefix('|')?;
    let mut fields = rest.splitn(4, '|');

    let status = match strip_ansi(fields.next()?).trim() {
        "downloading" => TickStatus::Downloading,
        "finished" => TickStatus::Finished,
        other => TickStatus::Other(other.to_string()),
    };

    Some(RawTick {
        status,
        percent: fields.next().unwrap_or_default().to_string(),
        speed: fields.next().unwrap_or_default().to_string(),
        eta: fields.next().unwrap_or_default().to_string(),
    })
}

/// `[Merger] Merging formats into ...` and friends
pub fn is_postprocess_line(line: &str) -> bool {
    let line = line.trim_start();
    POSTPROCESS_TAGS.iter().any(|tag| line.starts_with(tag))
}

pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// `"\x1b[0;94m 45.2%\x1b[0m"` -> 45.2. Anything unparsable is 0.
pub fn parse_percent(raw: &str) -> f32 {
    let clean = strip_ansi(raw);
    let number = clean.trim().trim_end_matches('%').trim();
    match number.parse::<f32>() {
        Ok(v) if v.is_finite() => v.clamp(0.0, 100.0),
        _ => 0.0,
    }
}

/// Status line shown under the progress bar
pub fn status_line(update: &ProgressUpdate) -> String {
    format!("{:.1}% at {} | ETA: {}", update.percent, update.rate, update.eta)
}

fn clean_field(raw: &str, fallback: &str) -> String {
    let clean = strip_ansi(raw);
    let clean = clean.trim();
    if clean.is_empty() || clean == "NA" {
        fallback.to_string()
    } else {
        clean.to_string()
    }
}
