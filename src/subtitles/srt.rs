use anyhow::Result;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use super::SubtitleEntry;

/// Per-word timing tags emitted by auto-generated WebVTT tracks
static WORD_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\d{2}:\d{2}:\d{2}\.\d{3}>").expect("word timestamp regex"));

/// Inline style tags (`<c>`, `<c.colour>`, `<i>`, `<b>`, `<u>` and their closers)
static STYLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?(?:c(?:\.[\w.-]+)?|[biu])>").expect("style tag regex"));

impl fmt::Display for SubtitleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_duration(self.start),
            format_duration(self.end),
            self.text
        )
    }
}

/// Strip inline timing and style markup, collapse whitespace and trim
pub fn clean_text(text: &str) -> String {
    let without_timestamps = WORD_TIMESTAMP.replace_all(text, "");
    let without_styles = STYLE_TAG.replace_all(&without_timestamps, "");

    without_styles.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Entries overlapping `[window_start, window_end]`, clamped into the window,
/// shifted to start at zero and renumbered from 1.
///
/// Boundary-touching entries are kept (inclusive test) and end up with zero
/// length at the window edge. Entries whose cleaned text is empty are dropped.
pub fn select_window(
    entries: &[SubtitleEntry],
    window_start: Duration,
    window_end: Duration,
) -> Vec<SubtitleEntry> {
    if window_end < window_start {
        return Vec::new();
    }

    let window_length = window_end - window_start;
    let mut selected = Vec::new();

    for entry in entries.iter().filter(|e| e.intersects(window_start, window_end)) {
        let text = clean_text(&entry.text);
        if text.is_empty() {
            continue;
        }

        let start = entry.start.saturating_sub(window_start).min(window_length);
        let end = entry
            .end
            .min(window_end)
            .saturating_sub(window_start)
            .max(start);

        selected.push(SubtitleEntry::new(
            selected.len() as u32 + 1,
            start,
            end,
            text,
        ));
    }

    selected
}

/// Render the window `[window_start, window_end]` of `entries` as a SubRip
/// document. An empty string means no captions fall in the window.
pub fn format_window(entries: &[SubtitleEntry], window_start: Duration, window_end: Duration) -> String {
    SRTFormatter::render(&select_window(entries, window_start, window_end))
}

/// Plain transcript of the entries fully contained in `[begin, end]`
pub fn transcript_within(entries: &[SubtitleEntry], begin: Duration, end: Duration) -> String {
    entries
        .iter()
        .filter(|entry| entry.is_within(begin, end))
        .map(|entry| clean_text(&entry.text))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SubRip rendering utilities
pub struct SRTFormatter;

impl SRTFormatter {
    /// Render entries as sequential SubRip blocks
    pub fn render(entries: &[SubtitleEntry]) -> String {
        let mut srt_content = String::new();

        for entry in entries {
            srt_content.push_str(&entry.to_string());
            srt_content.push('\n');
        }

        srt_content
    }

    /// Render and write entries to a file
    pub async fn save_to_file<P: AsRef<Path>>(entries: &[SubtitleEntry], path: P) -> Result<()> {
        tokio::fs::write(path.as_ref(), Self::render(entries)).await?;
        Ok(())
    }
}

/// Format duration as SRT timestamp (HH:MM:SS,mmm)
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = duration.subsec_millis();

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
}
