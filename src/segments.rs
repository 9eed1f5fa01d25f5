//! Partitioning of long sources into bounded working segments.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::PipelineResult;
use crate::media::{MediaTool, SliceMode, SliceRequest};
use crate::subtitles::{select_window, SRTFormatter, SubtitleEntry};

/// Longest working segment cut from a source
pub const DEFAULT_SEGMENT_BOUND: Duration = Duration::from_secs(1200);

/// Planned sub-range of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWindow {
    /// 1-based segment number
    pub index: u32,
    pub start: Duration,
    pub bound: Duration,
}

impl SegmentWindow {
    pub fn end(&self) -> Duration {
        self.start + self.bound
    }

    /// Real length once the media tool truncates at end of stream
    pub fn expected_length(&self, total: Duration) -> Duration {
        total.saturating_sub(self.start).min(self.bound)
    }
}

/// Partition `[0, duration)` into windows of at most `bound`.
///
/// A source no longer than the bound (or a zero bound) stays whole.
pub fn plan_segments(duration: Duration, bound: Duration) -> Vec<SegmentWindow> {
    if bound.is_zero() || duration <= bound {
        return vec![SegmentWindow {
            index: 1,
            start: Duration::ZERO,
            bound: duration.max(bound),
        }];
    }

    let bound_nanos = bound.as_nanos();
    let count = duration.as_nanos().div_ceil(bound_nanos);

    (0..count)
        .map(|i| SegmentWindow {
            index: i as u32 + 1,
            start: bound * i as u32,
            bound,
        })
        .collect()
}

/// A caption track held on disk and in memory
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub path: PathBuf,
    /// Raw document as written on disk
    pub document: String,
    /// Entries on the owning media's timeline
    pub entries: Vec<SubtitleEntry>,
}

/// One bounded slice of a source
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub index: u32,
    pub media_path: PathBuf,
    pub captions: Option<CaptionTrack>,
    pub start: Duration,
    pub duration_bound: Duration,
    /// Whether the files were produced by splitting and may be removed
    pub derived: bool,
}

/// Splits sources into segments with matching caption tracks
pub struct SegmentPlanner {
    media: Arc<dyn MediaTool>,
    bound: Duration,
}

impl SegmentPlanner {
    pub fn new(media: Arc<dyn MediaTool>, bound: Duration) -> Self {
        Self { media, bound }
    }

    /// Split `source` into bounded segments.
    ///
    /// A short source yields a single segment referencing the original files.
    /// Longer sources are cut with stream copy into `<stem>.partN.mp4` next to
    /// the source, each with a re-timed `<stem>.partN.srt` when captions are
    /// available. A caption write failure leaves that segment uncaptioned.
    pub async fn split(
        &self,
        source: &Path,
        captions: Option<&CaptionTrack>,
    ) -> PipelineResult<Vec<MediaSegment>> {
        let duration = self.media.probe_duration(source).await?;
        let windows = plan_segments(duration, self.bound);

        if windows.len() == 1 {
            debug!("{} fits one segment ({:.1}s)", source.display(), duration.as_secs_f64());
            return Ok(vec![MediaSegment {
                index: 1,
                media_path: source.to_path_buf(),
                captions: captions.cloned(),
                start: Duration::ZERO,
                duration_bound: self.bound,
                derived: false,
            }]);
        }

        info!(
            "🔪 Splitting {} ({:.0}s) into {} segments",
            source.display(),
            duration.as_secs_f64(),
            windows.len()
        );

        let mut segments = Vec::with_capacity(windows.len());
        for window in windows {
            let media_path = part_path(source, window.index, "mp4");

            let slice = SliceRequest {
                input: source.to_path_buf(),
                output: media_path.clone(),
                start: window.start,
                length: window.bound,
                mode: SliceMode::StreamCopy,
            };
            if let Err(e) = self.media.extract_slice(&slice).await {
                warn!(
                    "Splitting {} failed at segment {}, removing the parts written so far",
                    source.display(),
                    window.index
                );
                remove_derived(&segments).await;
                if let Err(remove_error) = tokio::fs::remove_file(&media_path).await {
                    debug!("Could not remove {}: {}", media_path.display(), remove_error);
                }
                return Err(e);
            }

            let segment_captions = match captions {
                Some(track) => {
                    let caption_path = part_path(source, window.index, "srt");
                    match write_segment_captions(track, window, &caption_path).await {
                        Ok(track) => Some(track),
                        Err(e) => {
                            warn!(
                                "Segment {} of {} continues without captions: {}",
                                window.index,
                                source.display(),
                                e
                            );
                            None
                        }
                    }
                }
                None => None,
            };

            segments.push(MediaSegment {
                index: window.index,
                media_path,
                captions: segment_captions,
                start: window.start,
                duration_bound: window.bound,
                derived: true,
            });
        }

        Ok(segments)
    }
}

async fn write_segment_captions(
    source_track: &CaptionTrack,
    window: SegmentWindow,
    path: &Path,
) -> anyhow::Result<CaptionTrack> {
    let entries = select_window(&source_track.entries, window.start, window.end());
    let document = SRTFormatter::render(&entries);
    tokio::fs::write(path, &document).await?;

    Ok(CaptionTrack {
        path: path.to_path_buf(),
        document,
        entries,
    })
}

/// `<dir>/<stem>.part<N>.<ext>` for a source `<dir>/<stem>.<ext0>`
pub fn part_path(source: &Path, index: u32, extension: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{}.part{}.{}", stem, index, extension))
}

/// Delete the files of derived segments, keeping original sources
pub async fn remove_derived(segments: &[MediaSegment]) {
    for segment in segments.iter().filter(|s| s.derived) {
        let mut paths = vec![segment.media_path.clone()];
        if let Some(track) = &segment.captions {
            paths.push(track.path.clone());
        }

        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}
