use anyhow::Result;
use std::path::Path;
use std::time::Duration;

use super::SubtitleEntry;

const RANGE_MARKER: &str = "-->";

/// Read and parse a caption track from disk
pub async fn read_timed_text<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitleEntry>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(parse_timed_text(&content))
}

/// Parse a WebVTT or SubRip document into entries.
///
/// Blank lines, the `WEBVTT` header block and `NOTE` comment blocks are skipped.
/// A line holding a time range opens a new entry and every following
/// non-blank line up to the next time range is appended to its text.
/// Cue identifiers (the SubRip sequence number, or a WebVTT cue id) are
/// recognised by the time range that follows them and dropped.
pub fn parse_timed_text(document: &str) -> Vec<SubtitleEntry> {
    let lines: Vec<&str> = document.lines().map(|line| line.trim()).collect();
    let mut entries = Vec::new();
    let mut current: Option<SubtitleEntry> = None;
    let mut in_note = false;

    for (position, line) in lines.iter().enumerate() {
        if line.is_empty() {
            in_note = false;
            continue;
        }

        let block_start = position == 0 || lines[position - 1].is_empty();
        if block_start && is_note_marker(line) {
            in_note = true;
        }
        if in_note {
            continue;
        }

        if current.is_none() && line.starts_with("WEBVTT") {
            continue;
        }

        if line.contains(RANGE_MARKER) {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }

            let (start, end) = parse_time_range(line);
            current = Some(SubtitleEntry::new(
                entries.len() as u32 + 1,
                start,
                end,
                String::new(),
            ));
            continue;
        }

        if is_cue_identifier(&lines, position) {
            continue;
        }

        if let Some(entry) = current.as_mut() {
            if !entry.text.is_empty() {
                entry.text.push(' ');
            }
            entry.text.push_str(line);
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }

    entries
}

/// `NOTE` alone or followed by whitespace opens a WebVTT comment block
fn is_note_marker(line: &str) -> bool {
    line.strip_prefix("NOTE")
        .map_or(false, |rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// A line directly followed by a time range names the next cue
fn is_cue_identifier(lines: &[&str], position: usize) -> bool {
    lines
        .get(position + 1)
        .map_or(false, |next| next.contains(RANGE_MARKER))
}

fn parse_time_range(line: &str) -> (Duration, Duration) {
    let parts: Vec<&str> = line.split(RANGE_MARKER).collect();
    if parts.len() != 2 {
        return (Duration::ZERO, Duration::ZERO);
    }

    (parse_timestamp(parts[0]), parse_timestamp(parts[1]))
}

/// Parse `HH:MM:SS[.mmm]` into a duration.
///
/// A comma is accepted as fractional separator and anything after the first
/// whitespace (WebVTT cue settings) is ignored. Fields that do not parse count
/// as zero instead of failing the document.
pub fn parse_timestamp(timestamp: &str) -> Duration {
    let timestamp = timestamp
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .replace(',', ".");

    let parts: Vec<&str> = timestamp.split(':').collect();
    if parts.len() < 3 {
        return Duration::ZERO;
    }

    let hours = parts[0].parse::<u64>().unwrap_or(0);
    let minutes = parts[1].parse::<u64>().unwrap_or(0);

    let (seconds_part, fraction_part) = match parts[2].split_once('.') {
        Some((seconds, fraction)) => (seconds, Some(fraction)),
        None => (parts[2], None),
    };
    let seconds = seconds_part.parse::<u64>().unwrap_or(0);

    let milliseconds = fraction_part
        .map(|fraction| {
            let mut digits: String = fraction.chars().take(3).collect();
            while digits.len() < 3 {
                digits.push('0');
            }
            digits.parse::<u64>().unwrap_or(0)
        })
        .unwrap_or(0);

    hours
        .checked_mul(3600)
        .and_then(|total| minutes.checked_mul(60).and_then(|m| total.checked_add(m)))
        .and_then(|total| total.checked_add(seconds))
        .and_then(|total| total.checked_mul(1000))
        .and_then(|total| total.checked_add(milliseconds))
        .map_or(Duration::ZERO, Duration::from_millis)
}
