//! Timed-text handling: tolerant parsing of caption tracks and re-serialisation
//! of any time window of them as SubRip.

pub mod parser;
pub mod srt;

pub use parser::{parse_timed_text, parse_timestamp, read_timed_text};
pub use srt::{clean_text, format_window, select_window, transcript_within, SRTFormatter};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One caption block of a timed-text document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    /// Sequential number, starting at 1
    pub index: u32,
    /// Start offset from the beginning of the media
    pub start: Duration,
    /// End offset, never before `start` for well-formed input
    pub end: Duration,
    /// Caption text, lines joined with single spaces
    pub text: String,
}

impl SubtitleEntry {
    pub fn new(index: u32, start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
        }
    }

    /// Whether the entry overlaps `[window_start, window_end]`, boundaries included
    pub fn intersects(&self, window_start: Duration, window_end: Duration) -> bool {
        self.start <= window_end && self.end >= window_start
    }

    /// Whether the entry lies entirely inside `[window_start, window_end]`
    pub fn is_within(&self, window_start: Duration, window_end: Duration) -> bool {
        self.start >= window_start && self.end <= window_end
    }
}
