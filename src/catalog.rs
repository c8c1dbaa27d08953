//! Turns extractor format metadata into the labels shown in the format picker.

use crate::error::DownloadError;
use crate::model::FormatDescriptor;

/// Shown in place of the size when the extractor does not know it
pub const UNKNOWN_SIZE: &str = "?";

/// A picker entry and the format id it stands for
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub label: String,
    pub format_id: String,
}

/// Ordered picker entries for one discover call. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Builds the catalog, keeping the extractor's order.
    ///
    /// Descriptors with neither audio nor video are dropped. If nothing is
    /// left the result is [`DownloadError::NoFormats`], which callers report
    /// as a warning rather than a failure.
    pub fn build(formats: &[FormatDescriptor]) -> Result<Self, DownloadError> {
        let entries: Vec<CatalogEntry> = formats
            .iter()
            .filter(|f| f.is_usable())
            .map(|f| CatalogEntry {
                label: format_label(f),
                format_id: f.id.clone(),
            })
            .collect();

        if entries.is_empty() {
            return Err(DownloadError::NoFormats);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// The entry selected when the picker opens
    pub fn default_entry(&self) -> &CatalogEntry {
        // build() refuses to create an empty catalog
        &self.entries[0]
    }

    pub fn id_for_label(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.format_id.as_str())
    }
}

/// `"{id} | {resolution} | {container} | {fps} | {bitrate} | {size}"`.
/// Absent fps or bitrate leave their column empty.
pub fn format_label(format: &FormatDescriptor) -> String {
    let columns = [
        format.resolution.clone(),
        format.container.clone(),
        format.fps.map(|v| format!("{}fps", trim_number(v))).unwrap_or_default(),
        format
            .bitrate
            .map(|v| format!("{}kbps", trim_number(v)))
            .unwrap_or_default(),
        size_label(format.size_bytes),
    ];

    let mut label = format.id.clone();
    for column in columns {
        label.push_str(" |");
        if !column.is_empty() {
            label.push(' ');
            label.push_str(&column);
        }
    }
    label
}

/// Size in MiB with one decimal, e.g. `"50.0MB"`, or `"?"` when unknown.
/// A size of zero counts as unknown.
pub fn size_label(size_bytes: Option<u64>) -> String {
    match size_bytes {
        Some(bytes) if bytes > 0 => format!("{:.1}MB", bytes as f64 / 1024.0 / 1024.0),
        _ => UNKNOWN_SIZE.to_string(),
    }
}

/// 30.0 -> "30", 29.97 -> "29.97"
fn trim_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, resolution: &str, container: &str, size: Option<u64>) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            container: container.to_string(),
            resolution: resolution.to_string(),
            fps: None,
            bitrate: None,
            size_bytes: size,
            has_video: resolution != "audio",
            has_audio: resolution == "audio",
        }
    }

    #[test]
    fn builds_labels_for_video_and_audio() {
        let formats = vec![
            descriptor("137", "1080p", "mp4", Some(52_428_800)),
            descriptor("140", "audio", "m4a", None),
        ];

        let catalog = Catalog::build(&formats).unwrap();
        let pairs: Vec<(&str, &str)> = catalog
            .entries()
            .iter()
            .map(|e| (e.label.as_str(), e.format_id.as_str()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("137 | 1080p | mp4 | | | 50.0MB", "137"),
                ("140 | audio | m4a | | | ?", "140"),
            ]
        );
        assert_eq!(catalog.default_entry().format_id, "137");
    }

    #[test]
    fn drops_streams_without_audio_or_video_and_keeps_order() {
        let mut storyboard = descriptor("sb0", "48x27", "mhtml", None);
        storyboard.has_video = false;
        storyboard.has_audio = false;

        let formats = vec![
            descriptor("18", "360p", "mp4", Some(1_000_000)),
            storyboard,
            descriptor("251", "audio", "webm", Some(3_500_000)),
            descriptor("22", "720p", "mp4", None),
        ];

        let catalog = Catalog::build(&formats).unwrap();
        let ids: Vec<&str> = catalog.entries().iter().map(|e| e.format_id.as_str()).collect();
        assert_eq!(ids, vec!["18", "251", "22"]);

        for entry in catalog.entries() {
            assert_eq!(catalog.id_for_label(&entry.label), Some(entry.format_id.as_str()));
        }
        assert!(catalog.entries().iter().all(|e| e.format_id != "sb0"));
    }

    #[test]
    fn nothing_usable_is_no_formats() {
        let mut silent = descriptor("x", "none", "mhtml", None);
        silent.has_video = false;
        assert!(matches!(Catalog::build(&[silent]), Err(DownloadError::NoFormats)));
        assert!(matches!(Catalog::build(&[]), Err(DownloadError::NoFormats)));
    }

    #[test]
    fn fps_and_bitrate_columns() {
        let mut video = descriptor("299", "1920x1080", "mp4", None);
        video.fps = Some(60.0);
        assert_eq!(format_label(&video), "299 | 1920x1080 | mp4 | 60fps | | ?");

        let mut audio = descriptor("140", "audio only", "m4a", Some(3_145_728));
        audio.bitrate = Some(129.472);
        assert_eq!(format_label(&audio), "140 | audio only | m4a | | 129.472kbps | 3.0MB");
    }

    #[test]
    fn size_is_rounded_to_one_decimal() {
        assert_eq!(size_label(None), UNKNOWN_SIZE);
        assert_eq!(size_label(Some(0)), UNKNOWN_SIZE);
        assert_eq!(size_label(Some(1_048_576)), "1.0MB");
        assert_eq!(size_label(Some(1_572_864)), "1.5MB");
        assert_eq!(size_label(Some(123_456_789)), "117.7MB");
    }
}
