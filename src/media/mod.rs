//! External media tooling: duration probing, slicing, caption burn-in,
//! template overlays and cover frames, plus source downloads.

pub mod ffmpeg;
pub mod mock;
pub mod ytdlp;

pub use ffmpeg::FfmpegTool;
pub use ytdlp::{VideoDownloader, YtDlp};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::PipelineResult;

/// How a slice is cut from its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceMode {
    /// Copy streams without re-encoding, cutting at the nearest keyframes
    StreamCopy,
    /// Re-encode with the configured encoding settings
    Reencode,
}

/// Cut `[start, start + length)` of `input` into `output`
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start: Duration,
    pub length: Duration,
    pub mode: SliceMode,
}

/// Loop a still template as background and centre `foreground` on it
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRequest {
    pub background: PathBuf,
    pub foreground: PathBuf,
    pub output: PathBuf,
}

/// Render centred title text onto one frame of a template
#[derive(Debug, Clone, PartialEq)]
pub struct CoverRequest {
    pub template: PathBuf,
    pub output: PathBuf,
    /// Already wrapped, unescaped text
    pub text: String,
    pub font_file: Option<String>,
    pub font_size: u32,
    pub font_color: String,
    /// Extra drawtext options appended verbatim, e.g. `:borderw=2`
    pub font_effect: Option<String>,
}

/// Media processing capability.
///
/// Every operation reports a failing tool as `PipelineError::Encoding`,
/// except `probe_duration` which fails with `PipelineError::DurationProbe`.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Duration of a media file
    async fn probe_duration(&self, path: &Path) -> PipelineResult<Duration>;

    /// Extract a time slice of a media file
    async fn extract_slice(&self, request: &SliceRequest) -> PipelineResult<()>;

    /// Burn a SubRip document into a video
    async fn burn_captions(&self, input: &Path, captions: &Path, output: &Path) -> PipelineResult<()>;

    /// Compose a cut over a branded background template
    async fn compose_overlay(&self, request: &OverlayRequest) -> PipelineResult<()>;

    /// Render a cover image
    async fn render_cover(&self, request: &CoverRequest) -> PipelineResult<()>;
}

/// Parse probe output holding a single floating-point seconds value
pub fn parse_probe_output(stdout: &str) -> Option<Duration> {
    let value: f64 = stdout.lines().map(str::trim).find(|l| !l.is_empty())?.parse().ok()?;
    Duration::try_from_secs_f64(value).ok()
}

/// Seconds as a command-line argument; whole values print without a fraction
pub fn seconds_arg(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.3}", duration.as_secs_f64())
    }
}
