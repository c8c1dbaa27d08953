use std::path::{Path, PathBuf};

/// Characters no common filesystem accepts, and their lookalike replacements
const FORBIDDEN: [(char, char); 9] = [
    ('<', '＜'),
    ('>', '＞'),
    (':', '꞉'),
    ('"', '＂'),
    ('/', '⧸'),
    ('\\', '＼'),
    ('|', '｜'),
    ('?', '？'),
    ('*', '＊'),
];

const MAX_STEM_CHARS: usize = 200;

/// Makes a video title safe to use as a file name stem.
pub fn sanitize_title(title: &str) -> String {
    let mapped: String = title
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            FORBIDDEN
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect();

    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['.', ' ']).trim_start();
    let stem: String = trimmed.chars().take(MAX_STEM_CHARS).collect();

    if stem.is_empty() { "video".to_string() } else { stem }
}

/// `{dir}/{title}.{ext}`
pub fn output_path(dir: &Path, title: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_title(title), ext))
}

/// yt-dlp `-o` template writing to `{dir}/{title}.<real ext>`.
/// `%` starts a yt-dlp field, so literal ones are doubled.
pub fn output_template(dir: &Path, title: &str) -> String {
    let stem = sanitize_title(title).replace('%', "%%");
    dir.join(format!("{}.%(ext)s", stem)).to_string_lossy().into_owned()
}
